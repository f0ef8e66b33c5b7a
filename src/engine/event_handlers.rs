// src/engine/event_handlers.rs

//! Handlers for the events of one execution context.
//!
//! Every handler returns `Ok(true)` when the event is done, `Ok(false)` when
//! it must stay at the head of the queue and be retried later. An `Err` is
//! logged by the runner and the event is dropped.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collab::Alert;
use crate::errors::{DagmasterError, Result};
use crate::exec::processor::ProcessOutcome;
use crate::model::{TaskInstance, TaskInstanceId};
use crate::types::{TaskExecutionStatus, TimeoutStrategy, WorkflowState};

use super::StateEvent;
use super::backfill;
use super::context::ExecutionContext;

/// Dispatch one event to its handler.
pub async fn handle_event(ctx: &mut ExecutionContext, event: &StateEvent) -> Result<bool> {
    match event {
        StateEvent::TaskStateChange { task_instance_id } => {
            handle_task_state_change(ctx, *task_instance_id).await
        }
        StateEvent::ProcessStateChange { new_state } => {
            handle_process_state_change(ctx, *new_state).await
        }
        StateEvent::ProcessTimeout => handle_process_timeout(ctx).await,
        StateEvent::TaskTimeout { task_instance_id } => {
            handle_task_timeout(ctx, *task_instance_id).await
        }
    }
}

async fn handle_task_state_change(
    ctx: &mut ExecutionContext,
    task_instance_id: TaskInstanceId,
) -> Result<bool> {
    let in_errors = ctx
        .errors
        .values()
        .any(|t| t.id == Some(task_instance_id));
    if !ctx.active.contains_key(&task_instance_id) && !in_errors {
        debug!(
            instance_id = ctx.instance.id,
            task_instance_id, "state change for a task that is not active; dropped"
        );
        return Ok(true);
    }

    let mut task = match ctx
        .collab
        .repository
        .find_task_instance(task_instance_id)
        .await
    {
        Ok(task) => task,
        Err(DagmasterError::TaskInstanceNotFound(_)) => {
            return task_row_vanished(ctx, task_instance_id).await;
        }
        Err(err) => {
            warn!(
                instance_id = ctx.instance.id,
                task_instance_id,
                error = %err,
                "reloading task failed; event deferred"
            );
            return Ok(false);
        }
    };

    if !ctx.active.contains_key(&task_instance_id) {
        if task.state == TaskExecutionStatus::ForcedSuccess {
            ctx.force_success(task).await;
        }
        return Ok(true);
    }

    if task.state.is_finished() {
        ctx.task_finished(task).await;
        return Ok(true);
    }

    let processor = ctx.processors.get(task.task_type());
    let env = ctx.processor_env();
    match processor.on_state_change(&mut task, &env).await? {
        ProcessOutcome::Running => {
            ctx.active.insert(task_instance_id, task);
        }
        ProcessOutcome::Finished => {
            ctx.persist_task(&task).await;
            ctx.task_finished(task).await;
        }
    }
    Ok(true)
}

/// A task row that no longer exists: end the context when its instance row
/// is gone too, otherwise fail the task so the pass can settle.
async fn task_row_vanished(
    ctx: &mut ExecutionContext,
    task_instance_id: TaskInstanceId,
) -> Result<bool> {
    match ctx
        .collab
        .repository
        .find_workflow_instance(ctx.instance.id)
        .await
    {
        Err(err @ DagmasterError::InstanceNotFound(_)) => {
            ctx.abandon(&err);
            return Ok(true);
        }
        Err(err) => {
            warn!(instance_id = ctx.instance.id, error = %err, "checking workflow instance failed; event deferred");
            return Ok(false);
        }
        Ok(_) => {}
    }
    let Some(mut task) = ctx.active.get(&task_instance_id).cloned() else {
        return Ok(true);
    };
    warn!(
        instance_id = ctx.instance.id,
        task_code = task.task_code(),
        task_instance_id,
        "task instance record disappeared; marking failed"
    );
    task.finish(TaskExecutionStatus::Failure, Utc::now());
    ctx.task_finished(task).await;
    Ok(true)
}

async fn handle_process_state_change(
    ctx: &mut ExecutionContext,
    new_state: WorkflowState,
) -> Result<bool> {
    if new_state.is_finished() {
        ctx.instance.state = new_state;
        return end_of_pass(ctx).await;
    }
    if ctx.instance.state.is_finished() {
        debug!(
            instance_id = ctx.instance.id,
            requested = %new_state,
            "instance already finished; request ignored"
        );
        return Ok(true);
    }

    info!(
        instance_id = ctx.instance.id,
        from = %ctx.instance.state,
        to = %new_state,
        "workflow state change requested"
    );
    ctx.set_state(new_state).await;
    match new_state {
        WorkflowState::ReadyStop => {
            ctx.kill_all().await;
            ctx.submit_standby().await;
        }
        WorkflowState::ReadyPause => {
            ctx.pause_all().await;
            ctx.submit_standby().await;
        }
        _ => {}
    }
    ctx.update_state().await;
    Ok(true)
}

async fn handle_process_timeout(ctx: &mut ExecutionContext) -> Result<bool> {
    if ctx.instance.state.is_finished() {
        return Ok(true);
    }
    let strategy = ctx
        .instance
        .timeout
        .as_ref()
        .map(|t| t.strategy)
        .unwrap_or_default();
    ctx.collab.alerts.notify(Alert::ProcessTimeout {
        instance_id: ctx.instance.id,
        strategy,
    });
    if strategy == TimeoutStrategy::Failed {
        warn!(instance_id = ctx.instance.id, "workflow timed out; failing the pass");
        ctx.timed_out = true;
        ctx.standby.clear();
        ctx.kill_all().await;
        ctx.update_state().await;
    }
    Ok(true)
}

async fn handle_task_timeout(
    ctx: &mut ExecutionContext,
    task_instance_id: TaskInstanceId,
) -> Result<bool> {
    let Some(task) = ctx.active.get(&task_instance_id).cloned() else {
        return Ok(true);
    };
    let Some(policy) = task.definition.timeout.clone() else {
        return Ok(true);
    };
    ctx.collab.alerts.notify(Alert::TaskTimeout {
        instance_id: ctx.instance.id,
        task_instance_id,
        task_code: task.task_code(),
        strategy: policy.strategy,
    });
    if policy.strategy == TimeoutStrategy::Failed {
        fail_timed_out_task(ctx, task).await;
    }
    Ok(true)
}

async fn fail_timed_out_task(ctx: &mut ExecutionContext, mut task: TaskInstance) {
    warn!(
        instance_id = ctx.instance.id,
        task_code = task.task_code(),
        task_instance_id = ?task.id,
        "task timed out; marking failed"
    );
    let processor = ctx.processors.get(task.task_type());
    let env = ctx.processor_env();
    let mut stopping = task.clone();
    if let Err(err) = processor.stop(&mut stopping, &env).await {
        warn!(instance_id = ctx.instance.id, error = %err, "stopping timed out task failed");
    }
    task.finish(TaskExecutionStatus::Failure, Utc::now());
    ctx.persist_task(&task).await;
    ctx.pending_finished.push_back(task);
}

/// Persist the end of a pass, then either start the next backfill pass or
/// report the final state.
async fn end_of_pass(ctx: &mut ExecutionContext) -> Result<bool> {
    if ctx.exited {
        return Ok(true);
    }
    ctx.instance.end_time = Some(Utc::now());
    if let Err(err) = ctx
        .collab
        .repository
        .save_workflow_instance(ctx.instance.clone())
        .await
    {
        if let DagmasterError::InstanceNotFound(_) = err {
            ctx.abandon(&err);
            return Ok(true);
        }
        warn!(instance_id = ctx.instance.id, error = %err, "persisting end of pass failed; event deferred");
        return Ok(false);
    }
    ctx.timeouts.reset_pass();

    let state = ctx.instance.state;
    info!(
        instance_id = ctx.instance.id,
        workflow = %ctx.instance.name,
        %state,
        schedule_time = ?ctx.instance.schedule_time,
        "workflow pass finished"
    );
    ctx.collab.alerts.notify(Alert::InstanceFinished {
        instance_id: ctx.instance.id,
        name: ctx.instance.name.clone(),
        state,
        schedule_time: ctx.instance.schedule_time,
    });

    match backfill::start_next_pass(ctx).await {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(err) => {
            warn!(instance_id = ctx.instance.id, error = %err, "starting next backfill pass failed");
        }
    }

    if let (Some(parent), Some(parent_task)) = (
        ctx.instance.parent_instance_id,
        ctx.instance.parent_task_instance_id,
    ) {
        let delivered = ctx.pool.enqueue_event(
            parent,
            StateEvent::TaskStateChange {
                task_instance_id: parent_task,
            },
        );
        debug!(instance_id = ctx.instance.id, parent, delivered, "parent notified");
    }

    ctx.publish(state);
    ctx.exited = true;
    Ok(true)
}
