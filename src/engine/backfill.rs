// src/engine/backfill.rs

//! Backfill continuation: one pass per date, each on a fresh instance row.

use tracing::info;

use crate::errors::Result;
use crate::types::{CommandType, WorkflowState};

use super::context::ExecutionContext;

/// Start the next backfill pass if the one that just ended succeeded and a
/// date remains. Returns whether a new pass was started.
pub(crate) async fn start_next_pass(ctx: &mut ExecutionContext) -> Result<bool> {
    if ctx.instance.command_type != CommandType::Backfill
        || ctx.instance.state != WorkflowState::Success
    {
        return Ok(false);
    }
    let Some(mut plan) = ctx.instance.backfill.clone() else {
        return Ok(false);
    };
    let Some(next_date) = plan.advance() else {
        return Ok(false);
    };

    let mut next = ctx.instance.clone();
    next.id = 0;
    next.state = WorkflowState::SubmittedSuccess;
    next.start_time = None;
    next.end_time = None;
    next.var_pool.clear();
    next.schedule_time = Some(next_date);
    next.backfill = Some(plan);

    let created = ctx
        .collab
        .repository
        .create_workflow_instance(next)
        .await?;
    info!(
        previous_instance_id = ctx.instance.id,
        instance_id = created.id,
        schedule_time = %next_date,
        "starting next backfill pass"
    );
    ctx.pool.rebind(ctx.instance.id, created.id);
    ctx.instance = created;

    if let Err(err) = ctx.prepare_pass().await {
        ctx.fail_pass(&err);
    }
    Ok(true)
}
