// src/model/mod.rs

//! Definitions, instances and commands the engine operates on.
//!
//! - [`task`] holds task definitions, precedence edges and task instances.
//! - [`workflow`] holds workflow definitions and workflow instances.
//! - [`command`] is the external request a workflow instance is built from.
//! - [`params`] contains the typed parameter shapes of master-side task types.

pub mod command;
pub mod params;
pub mod task;
pub mod workflow;

/// Task identity inside a workflow definition.
pub type TaskCode = i64;
/// Workflow definition identity.
pub type WorkflowCode = i64;
/// Workflow instance row id.
pub type InstanceId = u64;
/// Task instance row id.
pub type TaskInstanceId = u64;

pub use command::{Command, CommandParams};
pub use params::{
    ConditionItem, ConditionsParameters, DependRelation, DependentItem, DependentParameters,
    ShellParameters, SubWorkflowParameters, SwitchCase, SwitchParameters, parse_params,
};
pub use task::{Direct, Property, TaskDefinition, TaskInstance, TaskRelation, TimeoutPolicy};
pub use workflow::{BackfillPlan, WorkflowDefinition, WorkflowInstance};
