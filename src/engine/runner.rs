// src/engine/runner.rs

//! The actor loop driving one execution context.
//!
//! Events arrive over the context's unbounded channel and are moved into its
//! local FIFO. The actor only holds a pool permit while it drains; between
//! drains it sleeps until an event arrives or the state-check timer fires
//! (retry intervals, polling task types and admission re-checks).

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use crate::model::InstanceId;
use crate::types::WorkflowState;

use super::StateEvent;
use super::context::{ContextDeps, ExecutionContext};
use super::event_handlers::handle_event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    /// Queue is empty.
    Idle,
    /// The head event asked to be retried later.
    Deferred,
    /// The context finished its last pass.
    Exited,
}

/// Drive the context of `instance_id` until it exits or the pool shuts down.
///
/// Returns the last state of the instance, or `None` if it could not be
/// loaded.
pub(crate) async fn run_instance(
    instance_id: InstanceId,
    deps: ContextDeps,
    mut rx: mpsc::UnboundedReceiver<StateEvent>,
    permits: Arc<Semaphore>,
) -> Option<WorkflowState> {
    let shutdown = deps.shutdown.clone();
    let config = deps.config.clone();

    let mut ctx = match ExecutionContext::load(instance_id, deps).await {
        Ok(ctx) => ctx,
        Err(err) => {
            error!(instance_id, error = %err, "cannot load workflow instance; context terminated");
            return None;
        }
    };

    let mut status = {
        let Ok(_permit) = permits.acquire().await else {
            return Some(ctx.state());
        };
        if let Err(err) = ctx.prepare_pass().await {
            ctx.fail_pass(&err);
        }
        drain(&mut ctx).await
    };

    while status != Drain::Exited {
        let wait = if status == Drain::Deferred {
            config.event_retry_interval()
        } else {
            config.state_check_interval()
        };

        let woke = tokio::select! {
            message = rx.recv() => match message {
                Some(event) => {
                    ctx.events.push(event);
                    false
                }
                None => {
                    warn!(instance_id, "event channel closed; context terminated");
                    break;
                }
            },
            _ = tokio::time::sleep(wait) => true,
            _ = shutdown.cancelled() => {
                info!(instance_id = ctx.instance().id, state = %ctx.state(), "shutdown requested; context stopped");
                break;
            }
        };
        while let Ok(event) = rx.try_recv() {
            ctx.events.push(event);
        }

        let Ok(_permit) = permits.acquire().await else {
            break;
        };
        if woke {
            wake(&mut ctx).await;
        }
        status = drain(&mut ctx).await;
    }

    Some(ctx.state())
}

/// Periodic re-check: polling processors, gated retries and admission.
async fn wake(ctx: &mut ExecutionContext) {
    if ctx.active.is_empty() && ctx.standby.is_empty() {
        return;
    }
    ctx.poll_active().await;
    ctx.submit_standby().await;
    ctx.settle().await;
    ctx.update_state().await;
}

async fn drain(ctx: &mut ExecutionContext) -> Drain {
    if ctx.exited {
        return Drain::Exited;
    }
    ctx.settle().await;
    while let Some(event) = ctx.events.front().cloned() {
        debug!(instance_id = ctx.instance().id, ?event, "handling event");
        match handle_event(ctx, &event).await {
            Ok(true) => {
                ctx.events.pop();
            }
            Ok(false) if ctx.exited => return Drain::Exited,
            Ok(false) => return Drain::Deferred,
            Err(err) => {
                warn!(
                    instance_id = ctx.instance().id,
                    ?event,
                    error = %err,
                    "event handler failed; event dropped"
                );
                ctx.events.pop();
            }
        }
        ctx.settle().await;
        if ctx.exited {
            return Drain::Exited;
        }
    }
    Drain::Idle
}
