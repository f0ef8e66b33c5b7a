// src/engine/aggregator.rs

//! Aggregate workflow state decision table.

use crate::types::{FailureStrategy, WorkflowState};

/// Snapshot of an execution context the aggregate state is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateInput {
    pub current: WorkflowState,
    pub failure_strategy: FailureStrategy,
    pub active: usize,
    pub standby: usize,
    /// A failed task sits in standby waiting for its retry.
    pub standby_has_retry: bool,
    /// Submit failure, dependency failure, unretryable error or workflow
    /// timeout.
    pub has_failed_task: bool,
    pub any_waiting_thread: bool,
    pub any_pause: bool,
    pub any_kill: bool,
    /// No backfill date remains after the current one.
    pub backfill_complete: bool,
}

/// Derive the next aggregate state. Rules are evaluated in order; the first
/// match wins.
pub fn aggregate(input: &AggregateInput) -> WorkflowState {
    let current = input.current;

    if input.active > 0 || input.standby_has_retry {
        return if current.is_sticky() {
            current
        } else {
            WorkflowState::Running
        };
    }

    if input.has_failed_task {
        return match input.failure_strategy {
            FailureStrategy::End => WorkflowState::Failure,
            FailureStrategy::Continue if input.standby == 0 => WorkflowState::Failure,
            FailureStrategy::Continue => WorkflowState::Running,
        };
    }

    if input.any_waiting_thread {
        return WorkflowState::WaitingThread;
    }

    match current {
        WorkflowState::ReadyPause => {
            if input.standby_has_retry {
                WorkflowState::Failure
            } else if input.any_pause || !input.backfill_complete || input.standby > 0 {
                WorkflowState::Pause
            } else {
                WorkflowState::Success
            }
        }
        WorkflowState::ReadyStop => {
            if input.any_kill || !input.backfill_complete {
                WorkflowState::Stop
            } else {
                WorkflowState::Success
            }
        }
        WorkflowState::Running => {
            if input.standby > 0 {
                WorkflowState::Running
            } else if input.any_kill {
                WorkflowState::Failure
            } else {
                WorkflowState::Success
            }
        }
        other => other,
    }
}
