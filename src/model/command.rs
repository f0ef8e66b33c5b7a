// src/model/command.rs

//! External request a workflow instance is built from.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DagmasterError, Result};
use crate::model::{InstanceId, Property, TaskCode, TaskInstanceId, WorkflowCode};
use crate::types::{CommandType, FailureStrategy, Priority, TaskDependType};

pub const WORKFLOW_INSTANCE_ID: &str = "workflow-instance-id";
pub const RECOVERY_START_NODE_IDS: &str = "recovery-start-node-ids";
pub const START_NODE_IDS: &str = "start-node-ids";
pub const TASK_DEPEND_TYPE: &str = "task-depend-type";
pub const BACKFILL_START_DATE: &str = "backfill-start-date";
pub const BACKFILL_END_DATE: &str = "backfill-end-date";
pub const PARENT_INSTANCE_ID: &str = "sub-workflow-parent-instance-id";
pub const PARENT_TASK_INSTANCE_ID: &str = "sub-workflow-parent-task-instance-id";

/// String key/value parameters of a command, with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandParams(BTreeMap<String, String>);

impl CommandParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn workflow_instance_id(&self) -> Result<Option<InstanceId>> {
        self.parse_one(WORKFLOW_INSTANCE_ID)
    }

    pub fn recovery_start_node_ids(&self) -> Result<Vec<TaskInstanceId>> {
        self.parse_list(RECOVERY_START_NODE_IDS)
    }

    pub fn start_node_ids(&self) -> Result<Vec<TaskCode>> {
        self.parse_list(START_NODE_IDS)
    }

    pub fn task_depend_type(&self) -> Result<TaskDependType> {
        match self.get(TASK_DEPEND_TYPE) {
            Some(raw) => raw.parse().map_err(DagmasterError::InvalidCommand),
            None => Ok(TaskDependType::default()),
        }
    }

    /// Inclusive backfill range, if both ends are present.
    pub fn backfill_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        match (self.get(BACKFILL_START_DATE), self.get(BACKFILL_END_DATE)) {
            (Some(start), Some(end)) => Ok(Some((parse_date(start)?, parse_date(end)?))),
            (None, None) => Ok(None),
            _ => Err(DagmasterError::InvalidCommand(format!(
                "both {BACKFILL_START_DATE} and {BACKFILL_END_DATE} are required"
            ))),
        }
    }

    pub fn parent_instance_id(&self) -> Result<Option<InstanceId>> {
        self.parse_one(PARENT_INSTANCE_ID)
    }

    pub fn parent_task_instance_id(&self) -> Result<Option<TaskInstanceId>> {
        self.parse_one(PARENT_TASK_INSTANCE_ID)
    }

    fn parse_one<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|_| {
                    DagmasterError::InvalidCommand(format!("invalid value for {key}: {raw}"))
                })
            })
            .transpose()
    }

    fn parse_list<T: FromStr>(&self, key: &str) -> Result<Vec<T>> {
        let Some(raw) = self.get(key) else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<T>().map_err(|_| {
                    DagmasterError::InvalidCommand(format!("invalid entry in {key}: {s}"))
                })
            })
            .collect()
    }
}

/// Accepts `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| DagmasterError::InvalidCommand(format!("invalid date: {raw}")))
}

/// A request to start, recover or backfill a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command_type: CommandType,
    pub workflow_code: WorkflowCode,
    pub workflow_version: u32,
    #[serde(default)]
    pub params: CommandParams,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    /// Overrides merged over the definition's global parameters.
    #[serde(default)]
    pub global_params: BTreeMap<String, String>,
    /// Start var pool, e.g. handed down by a parent workflow.
    #[serde(default)]
    pub var_pool: Vec<Property>,
}

impl Command {
    pub fn new(command_type: CommandType, workflow_code: WorkflowCode, workflow_version: u32) -> Self {
        Self {
            command_type,
            workflow_code,
            workflow_version,
            params: CommandParams::default(),
            failure_strategy: FailureStrategy::default(),
            priority: Priority::default(),
            schedule_time: None,
            global_params: BTreeMap::new(),
            var_pool: Vec::new(),
        }
    }

    /// Command resuming an existing instance row.
    pub fn resume(command_type: CommandType, instance_id: InstanceId) -> Self {
        let mut cmd = Self::new(command_type, 0, 0);
        cmd.params.set(WORKFLOW_INSTANCE_ID, instance_id);
        cmd
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.set(key, value);
        self
    }
}
