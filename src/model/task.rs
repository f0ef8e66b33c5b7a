// src/model/task.rs

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{InstanceId, TaskCode, TaskInstanceId};
use crate::types::{Priority, TaskExecutionStatus, TaskType, TimeoutStrategy};

/// Timeout policy of a task or workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: TimeoutStrategy,
    /// Allowed run time in seconds.
    pub seconds: u64,
}

fn default_true() -> bool {
    true
}

impl TimeoutPolicy {
    pub fn duration(&self) -> Option<std::time::Duration> {
        if self.enabled && self.seconds > 0 {
            Some(std::time::Duration::from_secs(self.seconds))
        } else {
            None
        }
    }
}

/// Static description of one node of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub code: TaskCode,
    pub version: u32,
    pub name: String,
    pub task_type: TaskType,
    /// Type-specific parameters, interpreted by the task's processor or worker.
    #[serde(default)]
    pub task_params: serde_json::Value,
    #[serde(default)]
    pub max_retry_times: u32,
    /// Seconds to wait after a failure before the next attempt.
    #[serde(default)]
    pub retry_interval: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_worker_group")]
    pub worker_group: String,
    #[serde(default)]
    pub environment_code: Option<i64>,
    #[serde(default)]
    pub timeout: Option<TimeoutPolicy>,
    /// Seconds the worker waits before starting the task.
    #[serde(default)]
    pub delay_time: u64,
    #[serde(default)]
    pub forbidden: bool,
}

fn default_worker_group() -> String {
    "default".to_string()
}

impl TaskDefinition {
    pub fn new(code: TaskCode, name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            code,
            version: 1,
            name: name.into(),
            task_type,
            task_params: serde_json::Value::Null,
            max_retry_times: 0,
            retry_interval: 0,
            priority: Priority::default(),
            worker_group: default_worker_group(),
            environment_code: None,
            timeout: None,
            delay_time: 0,
            forbidden: false,
        }
    }
}

/// Precedence edge `pre -> post`; `pre == None` marks a root-only relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRelation {
    pub pre: Option<TaskCode>,
    pub post: TaskCode,
}

impl TaskRelation {
    pub fn edge(pre: TaskCode, post: TaskCode) -> Self {
        Self {
            pre: Some(pre),
            post,
        }
    }

    pub fn root(post: TaskCode) -> Self {
        Self { pre: None, post }
    }
}

/// Direction of a var-pool property relative to the task holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direct {
    In,
    Out,
}

/// One named value of a var pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub direct: Direct,
    #[serde(default)]
    pub value: String,
}

impl Property {
    pub fn output(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direct: Direct::Out,
            value: value.into(),
        }
    }
}

/// One execution attempt record of a task definition inside a workflow
/// instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    /// Assigned by the repository on first persist.
    pub id: Option<TaskInstanceId>,
    pub workflow_instance_id: InstanceId,
    /// Copied from the workflow instance; part of the standby ordering key.
    pub workflow_priority: Priority,
    pub definition: TaskDefinition,
    pub state: TaskExecutionStatus,
    pub submit_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub retry_times: u32,
    /// Input pool while waiting, output pool once finished.
    pub var_pool: Vec<Property>,
    pub host: Option<String>,
    pub first_run: bool,
    /// Superseded rows are invalid and ignored on recovery.
    pub valid: bool,
    /// Successor chosen by a SWITCH task.
    pub switch_next: Option<TaskCode>,
    /// Child instance started by a SUB_WORKFLOW task.
    pub child_instance_id: Option<InstanceId>,
}

impl TaskInstance {
    pub fn new(
        workflow_instance_id: InstanceId,
        workflow_priority: Priority,
        definition: TaskDefinition,
    ) -> Self {
        Self {
            id: None,
            workflow_instance_id,
            workflow_priority,
            definition,
            state: TaskExecutionStatus::SubmittedSuccess,
            submit_time: None,
            start_time: None,
            end_time: None,
            retry_times: 0,
            var_pool: Vec::new(),
            host: None,
            first_run: true,
            valid: true,
            switch_next: None,
            child_instance_id: None,
        }
    }

    pub fn task_code(&self) -> TaskCode {
        self.definition.code
    }

    pub fn task_type(&self) -> &TaskType {
        &self.definition.task_type
    }

    /// Whether a finished attempt may be retried in place.
    pub fn can_retry(&self) -> bool {
        if self.definition.task_type.is_sub_workflow() {
            return false;
        }
        match self.state {
            TaskExecutionStatus::NeedFaultTolerance => true,
            TaskExecutionStatus::Failure => self.retry_times < self.definition.max_retry_times,
            _ => false,
        }
    }

    /// Whether the retry interval since the previous attempt has elapsed.
    pub fn retry_interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        if self.state != TaskExecutionStatus::Failure
            || self.definition.max_retry_times == 0
            || self.definition.retry_interval == 0
        {
            return true;
        }
        let Some(end) = self.end_time else {
            return true;
        };
        now.signed_duration_since(end) >= self.retry_delay()
    }

    /// Moment a waiting retry becomes eligible, if it is still gated.
    /// `None` as well when that moment is out of the representable range.
    pub fn retry_ready_at(&self) -> Option<DateTime<Utc>> {
        if self.state != TaskExecutionStatus::Failure || self.definition.retry_interval == 0 {
            return None;
        }
        self.end_time
            .and_then(|end| end.checked_add_signed(self.retry_delay()))
    }

    /// Retry interval, saturated at the largest representable delay.
    fn retry_delay(&self) -> TimeDelta {
        i64::try_from(self.definition.retry_interval)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Mark the task finished with `state` at `now`.
    pub fn finish(&mut self, state: TaskExecutionStatus, now: DateTime<Utc>) {
        self.state = state;
        self.end_time = Some(now);
    }

    pub fn output_vars(&self) -> impl Iterator<Item = &Property> {
        self.var_pool.iter().filter(|p| p.direct == Direct::Out)
    }
}
