// src/engine/mod.rs

//! Per-instance execution engine.
//!
//! This module ties together:
//! - the execution context of one workflow instance (DAG, completed /
//!   active / standby / error maps) in [`context`]
//! - the standby dispatch queue in [`standby`]
//! - the aggregate state decision table in [`aggregator`]
//! - the event handlers in [`event_handlers`] and the actor loop that drives
//!   them in [`runner`]
//! - backfill continuation in [`backfill`]
//! - the instance pool / registry in [`pool`] and command intake in
//!   [`intake`]
//!
//! Pure decisions (aggregation, standby ordering) are kept free of IO so they
//! can be tested without Tokio; the context and the runner are the async
//! shell around them.

use crate::model::TaskInstanceId;
use crate::types::WorkflowState;

/// Events flowing into an instance's queue from workers, timers, parents
/// and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    /// A task row changed; reload it and react.
    TaskStateChange { task_instance_id: TaskInstanceId },
    /// Request (or notification) to move the instance into `new_state`.
    ProcessStateChange { new_state: WorkflowState },
    /// The workflow-level timeout fired.
    ProcessTimeout,
    /// The timeout of a task fired.
    TaskTimeout { task_instance_id: TaskInstanceId },
}

pub mod aggregator;
pub mod backfill;
pub mod context;
pub mod event_handlers;
pub mod events;
pub mod intake;
pub mod pool;
pub mod runner;
pub mod standby;
pub mod timeout_wheel;

pub use aggregator::{AggregateInput, aggregate};
pub use context::ExecutionView;
pub use events::EventQueue;
pub use intake::{build_instance, run_command_consumer};
pub use pool::{EventInbox, EventNotifier, InstancePool, event_channel};
pub use standby::StandbyQueue;
pub use timeout_wheel::TimeoutWheel;
