// src/exec/sub_workflow.rs

//! SUB_WORKFLOW tasks run a child workflow instance through the pool.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collab::BoxFuture;
use crate::dag::varpool;
use crate::engine::StateEvent;
use crate::errors::{DagmasterError, Result};
use crate::model::command::{PARENT_INSTANCE_ID, PARENT_TASK_INSTANCE_ID};
use crate::model::{Command, Direct, Property, SubWorkflowParameters, TaskInstance, parse_params};
use crate::types::{CommandType, TaskExecutionStatus, WorkflowState};

use super::processor::{ProcessOutcome, ProcessorEnv, TaskProcessor};

/// Task state mirroring a terminal child state.
pub fn map_child_state(state: WorkflowState) -> Option<TaskExecutionStatus> {
    match state {
        WorkflowState::Success => Some(TaskExecutionStatus::Success),
        WorkflowState::Failure => Some(TaskExecutionStatus::Failure),
        WorkflowState::Stop => Some(TaskExecutionStatus::Kill),
        WorkflowState::Pause => Some(TaskExecutionStatus::Pause),
        WorkflowState::WaitingThread => Some(TaskExecutionStatus::WaitingThread),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SubWorkflowTaskProcessor;

impl SubWorkflowTaskProcessor {
    async fn check_child(
        &self,
        task: &mut TaskInstance,
        env: &ProcessorEnv,
    ) -> Result<ProcessOutcome> {
        let Some(child_id) = task.child_instance_id else {
            return Ok(ProcessOutcome::Running);
        };
        let child = env.collab.repository.find_workflow_instance(child_id).await?;
        let Some(state) = map_child_state(child.state) else {
            return Ok(ProcessOutcome::Running);
        };
        info!(
            task_code = task.task_code(),
            child_instance_id = child_id,
            child_state = %child.state,
            "child workflow finished"
        );
        let outputs: Vec<_> = child
            .var_pool
            .iter()
            .map(|p| Property {
                direct: Direct::Out,
                ..p.clone()
            })
            .collect();
        varpool::merge_into(&mut task.var_pool, outputs.iter());
        task.finish(state, Utc::now());
        Ok(ProcessOutcome::Finished)
    }

    fn forward(&self, task: &TaskInstance, env: &ProcessorEnv, new_state: WorkflowState) {
        let Some(child_id) = task.child_instance_id else {
            return;
        };
        if !env
            .pool
            .enqueue_event(child_id, StateEvent::ProcessStateChange { new_state })
        {
            debug!(child_instance_id = child_id, %new_state, "child not live; nothing forwarded");
        }
    }
}

impl TaskProcessor for SubWorkflowTaskProcessor {
    fn submit<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            if task.child_instance_id.is_some() {
                return self.check_child(task, env).await;
            }
            let params: SubWorkflowParameters = parse_params(&task.definition)?;
            let task_instance_id = task
                .id
                .ok_or(DagmasterError::InvalidTaskParams {
                    task_code: task.task_code(),
                    message: "sub-workflow task must be persisted before start".to_string(),
                })?;

            let mut command = Command::new(
                CommandType::Start,
                params.workflow_code,
                params.workflow_version.unwrap_or(0),
            );
            command.params.set(PARENT_INSTANCE_ID, env.view.instance_id);
            command.params.set(PARENT_TASK_INSTANCE_ID, task_instance_id);
            command.global_params = env.view.global_params.clone();
            command.var_pool = task.var_pool.clone();
            command.failure_strategy = env.view.failure_strategy;
            command.priority = env.view.priority;
            command.schedule_time = env.view.schedule_time;

            match env.pool.handle_command(command).await {
                Ok(child_id) => {
                    info!(
                        task_code = task.task_code(),
                        child_instance_id = child_id,
                        "child workflow started"
                    );
                    task.child_instance_id = Some(child_id);
                    task.state = TaskExecutionStatus::RunningExecution;
                    task.start_time = Some(Utc::now());
                    *task = env.collab.repository.save_task_instance(task.clone()).await?;
                    Ok(ProcessOutcome::Running)
                }
                Err(DagmasterError::PoolSaturated(live)) => {
                    warn!(
                        task_code = task.task_code(),
                        live,
                        "no slot for child workflow; waiting for a thread"
                    );
                    task.finish(TaskExecutionStatus::WaitingThread, Utc::now());
                    Ok(ProcessOutcome::Finished)
                }
                Err(err) => Err(err),
            }
        })
    }

    fn on_state_change<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move { self.check_child(task, env).await })
    }

    fn stop<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            self.forward(task, env, WorkflowState::ReadyStop);
            Ok(ProcessOutcome::Running)
        })
    }

    fn pause<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            self.forward(task, env, WorkflowState::ReadyPause);
            Ok(ProcessOutcome::Running)
        })
    }

    fn polls(&self) -> bool {
        true
    }
}
