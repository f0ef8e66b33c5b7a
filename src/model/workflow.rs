// src/model/workflow.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::command::CommandParams;
use crate::model::{
    InstanceId, Property, TaskCode, TaskDefinition, TaskInstanceId, TaskRelation, TimeoutPolicy,
    WorkflowCode,
};
use crate::types::{CommandType, FailureStrategy, Priority, WorkflowState};

/// A versioned workflow definition: tasks plus precedence edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub code: WorkflowCode,
    pub version: u32,
    pub name: String,
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub relations: Vec<TaskRelation>,
    #[serde(default)]
    pub global_params: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout: Option<TimeoutPolicy>,
    /// Cron expressions handed to the cron collaborator on backfill.
    #[serde(default)]
    pub schedules: Vec<String>,
}

impl WorkflowDefinition {
    pub fn task(&self, code: TaskCode) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.code == code)
    }
}

/// Backfill date list and the cursor of the pass currently running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillPlan {
    pub dates: Vec<DateTime<Utc>>,
    pub cursor: usize,
}

impl BackfillPlan {
    pub fn new(dates: Vec<DateTime<Utc>>) -> Self {
        Self { dates, cursor: 0 }
    }

    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.dates.get(self.cursor).copied()
    }

    pub fn is_last(&self) -> bool {
        self.cursor + 1 >= self.dates.len()
    }

    /// Move to the next date; returns it, or `None` when exhausted.
    pub fn advance(&mut self) -> Option<DateTime<Utc>> {
        if self.is_last() {
            return None;
        }
        self.cursor += 1;
        self.current()
    }
}

/// One execution of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub definition_code: WorkflowCode,
    pub definition_version: u32,
    pub name: String,
    pub global_params: BTreeMap<String, String>,
    /// Instance-level var pool, fed by successful task outputs.
    pub var_pool: Vec<Property>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub command_type: CommandType,
    pub command_params: CommandParams,
    pub failure_strategy: FailureStrategy,
    pub priority: Priority,
    pub state: WorkflowState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timeout: Option<TimeoutPolicy>,
    pub backfill: Option<BackfillPlan>,
    pub parent_instance_id: Option<InstanceId>,
    pub parent_task_instance_id: Option<TaskInstanceId>,
}

impl WorkflowInstance {
    /// Fresh instance of `definition`; the repository assigns the id.
    pub fn from_definition(definition: &WorkflowDefinition, command_type: CommandType) -> Self {
        Self {
            id: 0,
            definition_code: definition.code,
            definition_version: definition.version,
            name: definition.name.clone(),
            global_params: definition.global_params.clone(),
            var_pool: Vec::new(),
            schedule_time: None,
            command_type,
            command_params: CommandParams::default(),
            failure_strategy: FailureStrategy::default(),
            priority: Priority::default(),
            state: WorkflowState::SubmittedSuccess,
            start_time: None,
            end_time: None,
            timeout: definition.timeout.clone(),
            backfill: None,
            parent_instance_id: None,
            parent_task_instance_id: None,
        }
    }

    pub fn is_sub_workflow(&self) -> bool {
        self.parent_instance_id.is_some()
    }

    /// True unless a backfill still has dates after the current one.
    pub fn is_backfill_complete(&self) -> bool {
        self.backfill.as_ref().is_none_or(BackfillPlan::is_last)
    }
}
