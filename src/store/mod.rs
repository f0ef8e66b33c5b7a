// src/store/mod.rs

//! Persistence seam of the engine.
//!
//! The engine only talks to [`WorkflowRepository`] and [`CommandSource`];
//! [`memory::MemoryRepository`] implements both in process.

pub mod memory;

use crate::collab::BoxFuture;
use crate::errors::Result;
use crate::model::{
    Command, InstanceId, TaskCode, TaskInstance, TaskInstanceId, WorkflowCode, WorkflowDefinition,
    WorkflowInstance,
};
use crate::types::{TaskExecutionStatus, WorkflowState};

pub use memory::MemoryRepository;

/// Durable storage of definitions and instances.
pub trait WorkflowRepository: Send + Sync {
    /// `version = None` selects the latest version.
    fn find_workflow_definition(
        &self,
        code: WorkflowCode,
        version: Option<u32>,
    ) -> BoxFuture<'_, Result<WorkflowDefinition>>;

    fn find_workflow_instance(&self, id: InstanceId) -> BoxFuture<'_, Result<WorkflowInstance>>;

    /// Store a new row; the returned instance carries the assigned id.
    fn create_workflow_instance(
        &self,
        instance: WorkflowInstance,
    ) -> BoxFuture<'_, Result<WorkflowInstance>>;

    fn save_workflow_instance(&self, instance: WorkflowInstance) -> BoxFuture<'_, Result<()>>;

    fn find_task_instance(&self, id: TaskInstanceId) -> BoxFuture<'_, Result<TaskInstance>>;

    /// All task rows of a workflow instance, valid or not, by id.
    fn find_task_instances(
        &self,
        workflow_instance_id: InstanceId,
    ) -> BoxFuture<'_, Result<Vec<TaskInstance>>>;

    /// Insert (when `id` is `None`) or update a task row.
    fn save_task_instance(&self, task: TaskInstance) -> BoxFuture<'_, Result<TaskInstance>>;

    /// State of the latest valid instance of `task_code` in any instance of
    /// `workflow_code`.
    fn find_last_task_state(
        &self,
        workflow_code: WorkflowCode,
        task_code: TaskCode,
    ) -> BoxFuture<'_, Result<Option<TaskExecutionStatus>>>;

    /// State of the latest instance of `workflow_code`.
    fn find_last_workflow_state(
        &self,
        workflow_code: WorkflowCode,
    ) -> BoxFuture<'_, Result<Option<WorkflowState>>>;
}

/// Queue of pending commands.
pub trait CommandSource: Send + Sync {
    fn next_command(&self) -> BoxFuture<'_, Result<Option<Command>>>;
}
