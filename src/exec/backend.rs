// src/exec/backend.rs

//! Worker dispatch abstraction.
//!
//! The engine talks to a [`DispatchClient`] instead of to workers directly.
//! This makes it easy to swap in a scripted fake in tests while keeping the
//! local shell worker in [`executor_loop`](super::executor_loop).
//!
//! - [`LocalShellDispatcher`] is the default client used by the `dagmaster`
//!   binary. It wraps the executor loop spawned by
//!   [`spawn_executor`](super::executor_loop::spawn_executor) and forwards
//!   requests to it over an mpsc channel.
//! - Workers report back by writing the task row and raising a
//!   TASK_STATE_CHANGE through an [`EventNotifier`].

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::collab::BoxFuture;
use crate::engine::EventNotifier;
use crate::errors::{DagmasterError, Result};
use crate::model::{TaskInstance, TaskInstanceId};
use crate::store::WorkflowRepository;
use crate::types::TaskType;

use super::executor_loop::spawn_executor;

/// Hands tasks to workers and asks them to stop.
pub trait DispatchClient: Send + Sync {
    fn submit(&self, task: TaskInstance) -> BoxFuture<'_, Result<()>>;

    fn send_kill(&self, task: TaskInstance) -> BoxFuture<'_, Result<()>>;
}

/// Request understood by the local executor loop.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    Run(TaskInstance),
    Kill(TaskInstanceId),
}

/// Runs SHELL tasks as local `sh -c` processes.
#[derive(Debug, Clone)]
pub struct LocalShellDispatcher {
    tx: mpsc::Sender<WorkerRequest>,
}

impl LocalShellDispatcher {
    /// Spawns the background executor loop immediately.
    pub fn new(repository: Arc<dyn WorkflowRepository>, notifier: EventNotifier) -> Self {
        let tx = spawn_executor(repository, notifier);
        Self { tx }
    }

    async fn send(&self, request: WorkerRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| DagmasterError::Dispatch("local executor loop is closed".to_string()))
    }
}

impl DispatchClient for LocalShellDispatcher {
    fn submit(&self, task: TaskInstance) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if *task.task_type() != TaskType::Shell {
                return Err(DagmasterError::Dispatch(format!(
                    "no local worker for task type {} (task {})",
                    task.task_type(),
                    task.task_code()
                )));
            }
            self.send(WorkerRequest::Run(task)).await
        })
    }

    fn send_kill(&self, task: TaskInstance) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(id) = task.id else {
                return Ok(());
            };
            self.send(WorkerRequest::Kill(id)).await
        })
    }
}
