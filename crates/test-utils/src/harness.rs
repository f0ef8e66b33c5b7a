#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use dagmaster::collab::{Collaborators, PressureFlag};
use dagmaster::config::EngineConfig;
use dagmaster::engine::{InstancePool, StateEvent, event_channel};
use dagmaster::errors::Result;
use dagmaster::exec::ProcessorRegistry;
use dagmaster::model::{Command, InstanceId, TaskCode, TaskInstance, WorkflowDefinition};
use dagmaster::store::MemoryRepository;
use dagmaster::types::{CommandType, TaskExecutionStatus, WorkflowState};

use crate::alerts::RecordingAlertSink;
use crate::fake_dispatch::ScriptedDispatcher;

/// Engine tuning with intervals short enough for tests.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        exec_threads: 4,
        max_live_instances: None,
        submit_retry_times: 3,
        submit_retry_interval_ms: 5,
        state_check_interval_ms: 20,
        event_retry_interval_ms: 10,
        command_poll_interval_ms: 10,
    }
}

/// A pool wired to an in-memory repository, a scripted worker and a
/// recording alert sink.
pub struct TestEngine {
    pub repository: Arc<MemoryRepository>,
    pub dispatcher: Arc<ScriptedDispatcher>,
    pub alerts: Arc<RecordingAlertSink>,
    pub probe: Arc<PressureFlag>,
    pub pool: InstancePool,
    router: JoinHandle<()>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let repository = Arc::new(MemoryRepository::new());
        let (notifier, inbox) = event_channel();
        let dispatcher = Arc::new(ScriptedDispatcher::new(repository.clone(), notifier));
        let alerts = Arc::new(RecordingAlertSink::new());
        let probe = Arc::new(PressureFlag::new(false));
        let collab = Collaborators::new(repository.clone(), dispatcher.clone())
            .with_alerts(alerts.clone())
            .with_probe(probe.clone());
        let pool = InstancePool::new(config, collab, Arc::new(ProcessorRegistry::with_defaults()));
        let router = pool.route_events(inbox);
        Self {
            repository,
            dispatcher,
            alerts,
            probe,
            pool,
            router,
        }
    }

    pub fn define(&self, definition: WorkflowDefinition) {
        self.repository.insert_definition(definition);
    }

    /// Store `definition` and start it with a plain START command.
    pub async fn start(&self, definition: WorkflowDefinition) -> Result<InstanceId> {
        let command = Command::new(CommandType::Start, definition.code, definition.version);
        self.define(definition);
        self.pool.handle_command(command).await
    }

    pub async fn submit(&self, command: Command) -> Result<InstanceId> {
        self.pool.handle_command(command).await
    }

    /// Terminal state of an instance, once its context has left the pool.
    pub async fn wait(&self, instance_id: InstanceId) -> Result<WorkflowState> {
        let state = self.pool.wait_for_completion(instance_id).await?;
        for _ in 0..200 {
            if !self.pool.is_running(instance_id) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        Ok(state)
    }

    /// Store `definition` and run it with `command`.
    pub async fn run_command(
        &self,
        definition: WorkflowDefinition,
        command: Command,
    ) -> Result<(InstanceId, WorkflowState)> {
        self.define(definition);
        let id = self.submit(command).await?;
        let state = self.wait(id).await?;
        Ok((id, state))
    }

    /// Start `definition` and wait for its terminal state.
    pub async fn run(&self, definition: WorkflowDefinition) -> Result<(InstanceId, WorkflowState)> {
        let id = self.start(definition).await?;
        let state = self.wait(id).await?;
        Ok((id, state))
    }

    pub fn send(&self, instance_id: InstanceId, event: StateEvent) -> bool {
        self.pool.enqueue_event(instance_id, event)
    }

    /// State of every valid task row of an instance, by task code.
    pub fn task_states(&self, instance_id: InstanceId) -> HashMap<TaskCode, TaskExecutionStatus> {
        self.repository
            .task_instances(instance_id)
            .into_iter()
            .filter(|t| t.valid)
            .map(|t| (t.task_code(), t.state))
            .collect()
    }

    pub fn task(&self, instance_id: InstanceId, code: TaskCode) -> Option<TaskInstance> {
        self.repository
            .task_instances(instance_id)
            .into_iter()
            .find(|t| t.valid && t.task_code() == code)
    }

    /// Poll until `code` has a row in `state` or the attempts run out.
    pub async fn wait_for_task(
        &self,
        instance_id: InstanceId,
        code: TaskCode,
        state: TaskExecutionStatus,
    ) -> bool {
        for _ in 0..200 {
            if self.task(instance_id, code).is_some_and(|t| t.state == state) {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        false
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        self.pool.shutdown();
        self.router.abort();
    }
}
