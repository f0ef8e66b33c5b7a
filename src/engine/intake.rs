// src/engine/intake.rs

//! Command intake: turning commands into workflow instance rows.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::Collaborators;
use crate::errors::{DagmasterError, Result};
use crate::model::command::{RECOVERY_START_NODE_IDS, START_NODE_IDS};
use crate::model::{BackfillPlan, Command, TaskInstance, WorkflowInstance};
use crate::store::CommandSource;
use crate::types::{CommandType, TaskExecutionStatus, WorkflowState};

use super::pool::InstancePool;

/// Build (or, for recovery commands, reset) the instance row a command
/// runs.
pub async fn build_instance(command: Command, collab: &Collaborators) -> Result<WorkflowInstance> {
    if command.command_type.resumes_existing() {
        resume_instance(command, collab).await
    } else {
        create_instance(command, collab).await
    }
}

async fn create_instance(command: Command, collab: &Collaborators) -> Result<WorkflowInstance> {
    let version = (command.workflow_version != 0).then_some(command.workflow_version);
    let definition = collab
        .repository
        .find_workflow_definition(command.workflow_code, version)
        .await?;

    let mut instance = WorkflowInstance::from_definition(&definition, command.command_type);
    instance.global_params.extend(command.global_params.clone());
    instance.var_pool = command.var_pool.clone();
    instance.failure_strategy = command.failure_strategy;
    instance.priority = command.priority;
    instance.schedule_time = command.schedule_time;
    instance.parent_instance_id = command.params.parent_instance_id()?;
    instance.parent_task_instance_id = command.params.parent_task_instance_id()?;

    match command.command_type {
        CommandType::ExecuteSubset if command.params.start_node_ids()?.is_empty() => {
            return Err(DagmasterError::InvalidCommand(format!(
                "{START_NODE_IDS} is required to execute a subset"
            )));
        }
        CommandType::Backfill => {
            let (start, end) = command.params.backfill_range()?.ok_or_else(|| {
                DagmasterError::InvalidCommand("backfill requires a date range".to_string())
            })?;
            let dates = collab.cron.expand(start, end, &definition.schedules);
            if dates.is_empty() {
                return Err(DagmasterError::InvalidCommand(format!(
                    "no fire dates between {start} and {end}"
                )));
            }
            debug!(workflow_code = definition.code, dates = dates.len(), "backfill expanded");
            let plan = BackfillPlan::new(dates);
            instance.schedule_time = plan.current();
            instance.backfill = Some(plan);
        }
        _ => {}
    }
    instance.command_params = command.params;

    collab.repository.create_workflow_instance(instance).await
}

/// Task states a recovery command re-runs from.
fn recovers(command_type: CommandType, state: TaskExecutionStatus) -> bool {
    match command_type {
        CommandType::RecoverFailure => {
            state.is_failure() || state.is_kill() || state == TaskExecutionStatus::NeedFaultTolerance
        }
        CommandType::RecoverSuspended => state.is_pause() || state.is_kill(),
        CommandType::RepeatRun => true,
        _ => false,
    }
}

async fn resume_instance(command: Command, collab: &Collaborators) -> Result<WorkflowInstance> {
    let instance_id = command.params.workflow_instance_id()?.ok_or_else(|| {
        DagmasterError::InvalidCommand(format!(
            "{:?} requires a workflow instance id",
            command.command_type
        ))
    })?;
    let mut instance = collab.repository.find_workflow_instance(instance_id).await?;
    if command.command_type != CommandType::RecoverToleranceFault && !instance.state.is_finished() {
        return Err(DagmasterError::InvalidCommand(format!(
            "instance {instance_id} is {} and cannot be resumed",
            instance.state
        )));
    }

    let tasks: Vec<TaskInstance> = collab
        .repository
        .find_task_instances(instance_id)
        .await?
        .into_iter()
        .filter(|t| t.valid)
        .collect();

    let mut recovery_ids = Vec::new();
    for mut task in tasks {
        if !recovers(command.command_type, task.state) {
            continue;
        }
        if let Some(id) = task.id {
            recovery_ids.push(id.to_string());
        }
        task.valid = false;
        collab.repository.save_task_instance(task).await?;
    }

    instance.command_params.remove(RECOVERY_START_NODE_IDS);
    match command.command_type {
        CommandType::RepeatRun => {
            instance.var_pool.clear();
            instance.start_time = None;
            if let Some(plan) = instance.backfill.as_mut() {
                plan.cursor = 0;
                instance.schedule_time = plan.current();
            }
        }
        CommandType::RecoverFailure | CommandType::RecoverSuspended => {
            if !recovery_ids.is_empty() {
                instance
                    .command_params
                    .set(RECOVERY_START_NODE_IDS, recovery_ids.join(","));
            }
        }
        _ => {}
    }

    info!(
        instance_id,
        command = ?command.command_type,
        recovered = recovery_ids.len(),
        "resuming workflow instance"
    );
    instance.command_type = command.command_type;
    instance.state = WorkflowState::SubmittedSuccess;
    instance.end_time = None;
    collab.repository.save_workflow_instance(instance.clone()).await?;
    Ok(instance)
}

/// Poll `source` for commands and hand them to the pool until `shutdown`.
///
/// A command refused because the pool is saturated is held and offered
/// again after `poll_interval`.
pub async fn run_command_consumer(
    pool: InstancePool,
    source: Arc<dyn CommandSource>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut held: Option<Command> = None;
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        let command = match held.take() {
            Some(command) => Some(command),
            None => match source.next_command().await {
                Ok(command) => command,
                Err(err) => {
                    warn!(error = %err, "reading next command failed");
                    None
                }
            },
        };

        let Some(command) = command else {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.cancelled() => {}
            }
            continue;
        };

        match pool.handle_command(command.clone()).await {
            Ok(instance_id) => debug!(instance_id, "command started an instance"),
            Err(DagmasterError::PoolSaturated(live)) => {
                debug!(live, "pool saturated; command held");
                held = Some(command);
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
            Err(err) => warn!(error = %err, command = ?command.command_type, "command rejected"),
        }
    }
    debug!("command consumer stopped");
}
