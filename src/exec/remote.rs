// src/exec/remote.rs

//! Processor for worker-side task types (SHELL, SQL, plugins).

use tracing::debug;

use crate::collab::BoxFuture;
use crate::errors::Result;
use crate::model::TaskInstance;
use crate::types::TaskExecutionStatus;

use super::processor::{ProcessOutcome, ProcessorEnv, TaskProcessor};

/// Hands tasks to the dispatch client and waits for worker reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteTaskProcessor;

impl TaskProcessor for RemoteTaskProcessor {
    fn submit<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            task.state = TaskExecutionStatus::Dispatch;
            *task = env.collab.repository.save_task_instance(task.clone()).await?;
            env.collab.dispatcher.submit(task.clone()).await?;
            debug!(
                task_instance_id = ?task.id,
                task_code = task.task_code(),
                worker_group = %task.definition.worker_group,
                "task dispatched"
            );
            Ok(ProcessOutcome::Running)
        })
    }

    fn on_state_change<'a>(
        &'a self,
        _task: &'a mut TaskInstance,
        _env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async { Ok(ProcessOutcome::Running) })
    }

    fn stop<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            env.collab.dispatcher.send_kill(task.clone()).await?;
            Ok(ProcessOutcome::Running)
        })
    }
}
