// src/engine/pool.rs

//! Instance pool: the registry of live execution contexts.
//!
//! Every submitted instance gets its own actor (a tokio task) plus an event
//! channel and a state watch registered here. The registry guarantees at
//! most one live context per instance id; a bounded semaphore limits how
//! many contexts drain their queues at the same time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::errors::{DagmasterError, Result};
use crate::exec::processor::ProcessorRegistry;
use crate::model::{Command, InstanceId, WorkflowInstance};
use crate::types::WorkflowState;

use super::StateEvent;
use super::context::ContextDeps;
use super::intake::build_instance;
use super::runner::run_instance;

/// Sender half used by workers and other components to address events to
/// an instance through [`InstancePool::route_events`].
#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: mpsc::UnboundedSender<(InstanceId, StateEvent)>,
}

impl EventNotifier {
    pub fn notify(&self, instance_id: InstanceId, event: StateEvent) {
        if self.tx.send((instance_id, event)).is_err() {
            debug!(instance_id, "event router closed; event dropped");
        }
    }
}

#[derive(Debug)]
pub struct EventInbox {
    rx: mpsc::UnboundedReceiver<(InstanceId, StateEvent)>,
}

/// Channel feeding events from outside the pool into it.
pub fn event_channel() -> (EventNotifier, EventInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventNotifier { tx }, EventInbox { rx })
}

#[derive(Debug, Clone)]
struct PoolEntry {
    events: mpsc::UnboundedSender<StateEvent>,
    state: watch::Receiver<WorkflowState>,
    actor: u64,
}

#[derive(Debug, Default)]
struct Registry {
    entries: HashMap<InstanceId, PoolEntry>,
    live: usize,
    next_actor: u64,
}

struct PoolInner {
    config: EngineConfig,
    collab: Collaborators,
    processors: Arc<ProcessorRegistry>,
    permits: Arc<Semaphore>,
    registry: Mutex<Registry>,
    shutdown: CancellationToken,
}

/// Cloneable handle to the pool.
#[derive(Clone)]
pub struct InstancePool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("InstancePool")
            .field("live", &registry.live)
            .field("instances", &registry.entries.len())
            .finish_non_exhaustive()
    }
}

impl InstancePool {
    pub fn new(
        config: EngineConfig,
        collab: Collaborators,
        processors: Arc<ProcessorRegistry>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.exec_threads.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                config,
                collab,
                processors,
                permits,
                registry: Mutex::new(Registry::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.inner.collab
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_capacity(&self, registry: &Registry) -> Result<()> {
        match self.inner.config.max_live_instances {
            Some(max) if registry.live >= max => Err(DagmasterError::PoolSaturated(registry.live)),
            _ => Ok(()),
        }
    }

    /// Start driving `instance`. The instance row must already exist.
    pub fn submit(&self, instance: &WorkflowInstance) -> Result<()> {
        let id = instance.id;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(instance.state);

        let actor = {
            let mut registry = self.registry();
            if registry.entries.contains_key(&id) {
                return Err(DagmasterError::AlreadyScheduled(id));
            }
            self.check_capacity(&registry)?;
            let actor = registry.next_actor;
            registry.next_actor += 1;
            registry.live += 1;
            registry.entries.insert(
                id,
                PoolEntry {
                    events: events_tx.clone(),
                    state: state_rx,
                    actor,
                },
            );
            actor
        };

        let deps = ContextDeps {
            collab: self.inner.collab.clone(),
            pool: self.clone(),
            processors: Arc::clone(&self.inner.processors),
            config: self.inner.config.clone(),
            events_tx,
            state_tx,
            shutdown: self.inner.shutdown.child_token(),
        };
        let permits = Arc::clone(&self.inner.permits);
        let pool = self.clone();
        debug!(instance_id = id, actor, "spawning execution context");
        tokio::spawn(async move {
            let state = run_instance(id, deps, events_rx, permits).await;
            debug!(instance_id = id, ?state, "execution context exited");
            pool.release(actor);
        });
        Ok(())
    }

    /// Drop every registry entry of an exited actor.
    fn release(&self, actor: u64) {
        let mut registry = self.registry();
        registry.entries.retain(|_, entry| entry.actor != actor);
        registry.live = registry.live.saturating_sub(1);
    }

    /// Make the context registered under `old` reachable under `new` too.
    pub fn rebind(&self, old: InstanceId, new: InstanceId) {
        let mut registry = self.registry();
        if let Some(entry) = registry.entries.get(&old).cloned() {
            registry.entries.insert(new, entry);
        }
    }

    /// Queue an event for a live instance. Returns false if none is live.
    pub fn enqueue_event(&self, instance_id: InstanceId, event: StateEvent) -> bool {
        let registry = self.registry();
        match registry.entries.get(&instance_id) {
            Some(entry) => entry.events.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self, instance_id: InstanceId) -> bool {
        self.registry().entries.contains_key(&instance_id)
    }

    /// Last state published by a live context.
    pub fn current_state(&self, instance_id: InstanceId) -> Option<WorkflowState> {
        self.registry()
            .entries
            .get(&instance_id)
            .map(|entry| *entry.state.borrow())
    }

    pub fn live_instances(&self) -> usize {
        self.registry().live
    }

    /// Resolve with the terminal state of an instance.
    pub async fn wait_for_completion(&self, instance_id: InstanceId) -> Result<WorkflowState> {
        let receiver = self
            .registry()
            .entries
            .get(&instance_id)
            .map(|entry| entry.state.clone());
        if let Some(mut receiver) = receiver
            && let Ok(state) = receiver.wait_for(|s| s.is_finished()).await
        {
            return Ok(*state);
        }
        let instance = self
            .inner
            .collab
            .repository
            .find_workflow_instance(instance_id)
            .await?;
        Ok(instance.state)
    }

    /// Turn a command into an instance row and start driving it.
    pub async fn handle_command(&self, command: Command) -> Result<InstanceId> {
        self.check_capacity(&self.registry())?;
        let instance = build_instance(command, &self.inner.collab).await?;
        info!(
            instance_id = instance.id,
            workflow = %instance.name,
            command = ?instance.command_type,
            "command accepted"
        );
        self.submit(&instance)?;
        Ok(instance.id)
    }

    /// Forward events from an [`EventInbox`] into the addressed contexts.
    pub fn route_events(&self, mut inbox: EventInbox) -> JoinHandle<()> {
        let pool = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = inbox.rx.recv() => {
                        let Some((instance_id, event)) = message else {
                            break;
                        };
                        if !pool.enqueue_event(instance_id, event.clone()) {
                            warn!(instance_id, ?event, "no live context for event");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("event router stopped");
        })
    }

    /// Stop every actor and the event router.
    pub fn shutdown(&self) {
        info!("shutting down instance pool");
        self.inner.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }
}
