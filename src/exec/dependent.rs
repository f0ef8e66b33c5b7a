// src/exec/dependent.rs

//! DEPENDENT tasks wait on the latest run of tasks or workflows of other
//! definitions.

use chrono::Utc;
use tracing::{debug, info};

use crate::collab::BoxFuture;
use crate::errors::Result;
use crate::model::{DependRelation, DependentItem, DependentParameters, TaskInstance, parse_params};
use crate::types::{TaskExecutionStatus, WorkflowState};

use super::processor::{ProcessOutcome, ProcessorEnv, TaskProcessor};

/// Outcome of one dependent item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Success,
    Failed,
    Waiting,
}

/// Combine item outcomes; `None` while undecided.
pub fn combine_items(relation: DependRelation, items: &[ItemState]) -> Option<bool> {
    match relation {
        DependRelation::And => {
            if items.contains(&ItemState::Failed) {
                Some(false)
            } else if items.iter().all(|i| *i == ItemState::Success) {
                Some(true)
            } else {
                None
            }
        }
        DependRelation::Or => {
            if items.contains(&ItemState::Success) {
                Some(true)
            } else if items.iter().all(|i| *i == ItemState::Failed) {
                Some(false)
            } else {
                None
            }
        }
    }
}

async fn item_state(item: &DependentItem, env: &ProcessorEnv) -> Result<ItemState> {
    let repo = &env.collab.repository;
    let state = match item.task_code {
        Some(task_code) => repo
            .find_last_task_state(item.workflow_code, task_code)
            .await?
            .map(|s| {
                if s.is_success() {
                    ItemState::Success
                } else if s.is_failure() || s.is_kill() {
                    ItemState::Failed
                } else {
                    ItemState::Waiting
                }
            }),
        None => repo
            .find_last_workflow_state(item.workflow_code)
            .await?
            .map(|s| match s {
                WorkflowState::Success => ItemState::Success,
                WorkflowState::Failure | WorkflowState::Stop => {
                    ItemState::Failed
                }
                _ => ItemState::Waiting,
            }),
    };
    Ok(state.unwrap_or(ItemState::Waiting))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DependentTaskProcessor;

impl DependentTaskProcessor {
    async fn check(&self, task: &mut TaskInstance, env: &ProcessorEnv) -> Result<ProcessOutcome> {
        let params: DependentParameters = parse_params(&task.definition)?;
        let mut states = Vec::with_capacity(params.items.len());
        for item in &params.items {
            states.push(item_state(item, env).await?);
        }
        match combine_items(params.relation, &states) {
            Some(passed) => {
                info!(task_code = task.task_code(), passed, "dependencies resolved");
                let state = if passed {
                    TaskExecutionStatus::Success
                } else {
                    TaskExecutionStatus::Failure
                };
                task.finish(state, Utc::now());
                Ok(ProcessOutcome::Finished)
            }
            None => {
                debug!(task_code = task.task_code(), ?states, "dependencies still pending");
                Ok(ProcessOutcome::Running)
            }
        }
    }
}

impl TaskProcessor for DependentTaskProcessor {
    fn submit<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            task.state = TaskExecutionStatus::RunningExecution;
            task.start_time = Some(Utc::now());
            let outcome = self.check(task, env).await?;
            if outcome == ProcessOutcome::Running {
                *task = env.collab.repository.save_task_instance(task.clone()).await?;
            }
            Ok(outcome)
        })
    }

    fn on_state_change<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move { self.check(task, env).await })
    }

    fn stop<'a>(
        &'a self,
        task: &'a mut TaskInstance,
        _env: &'a ProcessorEnv,
    ) -> BoxFuture<'a, Result<ProcessOutcome>> {
        Box::pin(async move {
            task.finish(TaskExecutionStatus::Kill, Utc::now());
            Ok(ProcessOutcome::Finished)
        })
    }

    fn polls(&self) -> bool {
        true
    }
}
