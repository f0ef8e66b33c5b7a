// src/exec/processor.rs

//! Task processors: how the master submits, observes and stops one task.
//!
//! Processors are stateless and resolved once by task type from a
//! [`ProcessorRegistry`]. Every call gets the task instance to act on plus a
//! [`ProcessorEnv`] with the collaborators, the instance pool and a snapshot
//! of the owning execution context.
//!
//! A processor persists the intermediate states it moves a task into; the
//! execution context persists finished states.

use std::collections::HashMap;
use std::sync::Arc;

use crate::collab::{BoxFuture, Collaborators};
use crate::engine::{ExecutionView, InstancePool};
use crate::errors::Result;
use crate::model::TaskInstance;
use crate::types::TaskType;

use super::dependent::DependentTaskProcessor;
use super::logic::{ConditionsTaskProcessor, SwitchTaskProcessor};
use super::remote::RemoteTaskProcessor;
use super::sub_workflow::SubWorkflowTaskProcessor;

/// What a processor call left the task in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Still in flight; further events will follow.
    Running,
    /// The task reached a finished state during the call.
    Finished,
}

/// Everything a processor may consult while acting on a task.
#[derive(Clone)]
pub struct ProcessorEnv {
    pub collab: Collaborators,
    pub pool: InstancePool,
    pub view: ExecutionView,
}

pub trait TaskProcessor: Send + Sync {
    /// Start the task. Called once per attempt with a persisted row.
    fn submit<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>>;

    /// React to a non-final state change reported for the task, or a poll.
    fn on_state_change<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>>;

    /// Ask the task to stop.
    fn stop<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>>;

    /// Ask the task to pause. Most task types have nothing to pause.
    fn pause<'a>(
        &'a self,
        _task: &'a mut TaskInstance,
        _env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async { Ok(ProcessOutcome::Running) })
    }

    /// Whether `on_state_change` should also run on every wake-up.
    fn polls(&self) -> bool {
        false
    }
}

/// Processors keyed by task type; unknown types go to the remote processor.
pub struct ProcessorRegistry {
    fallback: Arc<dyn TaskProcessor>,
    by_type: HashMap<TaskType, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    /// Registry with the built-in processor of every master-side type.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            fallback: Arc::new(RemoteTaskProcessor),
            by_type: HashMap::new(),
        };
        registry.register(TaskType::Conditions, Arc::new(ConditionsTaskProcessor));
        registry.register(TaskType::Switch, Arc::new(SwitchTaskProcessor));
        registry.register(TaskType::Dependent, Arc::new(DependentTaskProcessor));
        registry.register(TaskType::SubWorkflow, Arc::new(SubWorkflowTaskProcessor));
        registry
    }

    pub fn register(&mut self, task_type: TaskType, processor: Arc<dyn TaskProcessor>) {
        self.by_type.insert(task_type, processor);
    }

    pub fn get(&self, task_type: &TaskType) -> Arc<dyn TaskProcessor> {
        self.by_type
            .get(task_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
