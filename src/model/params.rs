// src/model/params.rs

//! Typed views over the serialized `task_params` of a task definition.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{DagmasterError, Result};
use crate::model::{TaskCode, TaskDefinition, WorkflowCode};
use crate::types::TaskExecutionStatus;

/// Parse the definition's parameters into `T`.
pub fn parse_params<T: DeserializeOwned>(definition: &TaskDefinition) -> Result<T> {
    serde_json::from_value(definition.task_params.clone()).map_err(|e| {
        DagmasterError::InvalidTaskParams {
            task_code: definition.code,
            message: e.to_string(),
        }
    })
}

/// How item results combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependRelation {
    #[default]
    And,
    Or,
}

impl DependRelation {
    pub fn combine(self, mut results: impl Iterator<Item = bool>) -> bool {
        match self {
            DependRelation::And => results.all(|r| r),
            DependRelation::Or => results.any(|r| r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellParameters {
    pub command: String,
}

/// One condition: `task_code` must have finished with `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionItem {
    pub task_code: TaskCode,
    pub status: TaskExecutionStatus,
}

impl ConditionItem {
    /// Success and failure are compared by class, other states exactly.
    pub fn matches(&self, actual: TaskExecutionStatus) -> bool {
        if self.status.is_success() {
            actual.is_success()
        } else if self.status.is_failure() {
            actual.is_failure()
        } else {
            self.status == actual
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionsParameters {
    #[serde(default)]
    pub relation: DependRelation,
    #[serde(default)]
    pub items: Vec<ConditionItem>,
    #[serde(default)]
    pub success_node: Vec<TaskCode>,
    #[serde(default)]
    pub failed_node: Vec<TaskCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub condition: String,
    pub next_node: TaskCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchParameters {
    #[serde(default)]
    pub cases: Vec<SwitchCase>,
    #[serde(default)]
    pub default_node: Option<TaskCode>,
}

/// A task (or, without `task_code`, a whole workflow) of another definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentItem {
    pub workflow_code: WorkflowCode,
    #[serde(default)]
    pub task_code: Option<TaskCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentParameters {
    #[serde(default)]
    pub relation: DependRelation,
    pub items: Vec<DependentItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubWorkflowParameters {
    pub workflow_code: WorkflowCode,
    /// Latest known version when absent.
    #[serde(default)]
    pub workflow_version: Option<u32>,
}
