// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{DagmasterError, Result};
use crate::model::{TaskCode, TaskDefinition, TaskRelation, TimeoutPolicy, WorkflowDefinition};
use crate::types::{FailureStrategy, Priority, TaskType};

/// Engine tuning as read from the `[engine]` table of a TOML file.
///
/// ```toml
/// [engine]
/// exec_threads = 8
/// max_live_instances = 64
/// submit_retry_times = 3
/// submit_retry_interval_ms = 1000
/// ```
///
/// Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Contexts allowed to drain their queues at the same time.
    #[serde(default = "default_exec_threads")]
    pub exec_threads: usize,

    /// Upper bound on live contexts; unbounded when absent.
    #[serde(default)]
    pub max_live_instances: Option<usize>,

    /// Extra attempts at persisting a task before giving up on it.
    #[serde(default = "default_submit_retry_times")]
    pub submit_retry_times: u32,

    #[serde(default = "default_submit_retry_interval_ms")]
    pub submit_retry_interval_ms: u64,

    /// Period of the internal wake-up (retries, polling, admission).
    #[serde(default = "default_state_check_interval_ms")]
    pub state_check_interval_ms: u64,

    /// Delay before a deferred event is handled again.
    #[serde(default = "default_event_retry_interval_ms")]
    pub event_retry_interval_ms: u64,

    #[serde(default = "default_command_poll_interval_ms")]
    pub command_poll_interval_ms: u64,
}

fn default_exec_threads() -> usize {
    16
}

fn default_submit_retry_times() -> u32 {
    5
}

fn default_submit_retry_interval_ms() -> u64 {
    1000
}

fn default_state_check_interval_ms() -> u64 {
    1000
}

fn default_event_retry_interval_ms() -> u64 {
    500
}

fn default_command_poll_interval_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exec_threads: default_exec_threads(),
            max_live_instances: None,
            submit_retry_times: default_submit_retry_times(),
            submit_retry_interval_ms: default_submit_retry_interval_ms(),
            state_check_interval_ms: default_state_check_interval_ms(),
            event_retry_interval_ms: default_event_retry_interval_ms(),
            command_poll_interval_ms: default_command_poll_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn submit_retry_interval(&self) -> Duration {
        Duration::from_millis(self.submit_retry_interval_ms)
    }

    pub fn state_check_interval(&self) -> Duration {
        Duration::from_millis(self.state_check_interval_ms)
    }

    pub fn event_retry_interval(&self) -> Duration {
        Duration::from_millis(self.event_retry_interval_ms)
    }

    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_millis(self.command_poll_interval_ms)
    }
}

/// A file holding an `[engine]` table; other tables are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfigFile {
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Workflow file as read from TOML, before validation.
///
/// ```toml
/// [workflow]
/// code = 1
/// name = "nightly"
/// failure_strategy = "continue"
///
/// [global_params]
/// region = "eu"
///
/// [task.extract]
/// code = 10
/// command = "echo extracting ${region}"
///
/// [task.load]
/// code = 20
/// command = "echo loading"
/// after = ["extract"]
/// max_retries = 2
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowFile {
    pub workflow: WorkflowSection,

    #[serde(default)]
    pub global_params: BTreeMap<String, String>,

    /// Keys are the task names used in `after`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[workflow]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    pub code: i64,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub failure_strategy: FailureStrategy,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub timeout: Option<TimeoutPolicy>,

    /// Cron expressions handed to the cron expander for backfills.
    #[serde(default)]
    pub schedules: Vec<String>,
}

fn default_version() -> u32 {
    1
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub code: TaskCode,

    #[serde(rename = "type", default = "default_task_type")]
    pub task_type: TaskType,

    /// Shorthand for SHELL tasks: `params = { command = "…" }`.
    #[serde(default)]
    pub command: Option<String>,

    /// Type-specific parameters.
    #[serde(default)]
    pub params: Option<toml::Value>,

    /// Names of the tasks this one waits for.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub max_retries: u32,

    /// Seconds between attempts.
    #[serde(default)]
    pub retry_interval: u64,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub worker_group: Option<String>,

    #[serde(default)]
    pub environment: Option<i64>,

    #[serde(default)]
    pub timeout: Option<TimeoutPolicy>,

    /// Seconds to wait before starting.
    #[serde(default)]
    pub delay: u64,

    #[serde(default)]
    pub forbidden: bool,
}

fn default_task_type() -> TaskType {
    TaskType::Shell
}

impl TaskConfig {
    fn task_params(&self) -> Result<serde_json::Value> {
        let mut value = match &self.params {
            Some(params) => serde_json::to_value(params)?,
            None => serde_json::Value::Object(serde_json::Map::new()),
        };
        if let Some(command) = &self.command {
            match value.as_object_mut() {
                Some(map) => {
                    map.insert("command".to_string(), serde_json::Value::String(command.clone()));
                }
                None => {
                    return Err(DagmasterError::ConfigError(format!(
                        "task {}: params must be a table",
                        self.code
                    )));
                }
            }
        }
        Ok(value)
    }

    fn to_definition(&self, name: &str, version: u32) -> Result<TaskDefinition> {
        let mut def = TaskDefinition::new(self.code, name, self.task_type.clone());
        def.version = version;
        def.task_params = self.task_params()?;
        def.max_retry_times = self.max_retries;
        def.retry_interval = self.retry_interval;
        def.priority = self.priority;
        if let Some(group) = &self.worker_group {
            def.worker_group = group.clone();
        }
        def.environment_code = self.environment;
        def.timeout = self.timeout.clone();
        def.delay_time = self.delay;
        def.forbidden = self.forbidden;
        Ok(def)
    }
}

/// Validated workflow file. Construct through `TryFrom<RawWorkflowFile>`.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub workflow: WorkflowSection,
    pub global_params: BTreeMap<String, String>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl WorkflowFile {
    pub(crate) fn new_unchecked(raw: RawWorkflowFile) -> Self {
        Self {
            workflow: raw.workflow,
            global_params: raw.global_params,
            task: raw.task,
        }
    }

    /// Code of the task called `name`.
    pub fn code_of(&self, name: &str) -> Option<TaskCode> {
        self.task.get(name).map(|t| t.code)
    }

    /// Build the workflow definition the engine runs.
    pub fn to_definition(&self) -> Result<WorkflowDefinition> {
        let version = self.workflow.version;
        let mut tasks = Vec::with_capacity(self.task.len());
        let mut relations = Vec::new();

        for (name, task) in &self.task {
            tasks.push(task.to_definition(name, version)?);
            if task.after.is_empty() {
                relations.push(TaskRelation::root(task.code));
            }
            for dep in &task.after {
                let pre = self.code_of(dep).ok_or_else(|| {
                    DagmasterError::ConfigError(format!(
                        "task '{name}' has unknown dependency '{dep}' in `after`"
                    ))
                })?;
                relations.push(TaskRelation::edge(pre, task.code));
            }
        }

        let name = if self.workflow.name.is_empty() {
            format!("workflow-{}", self.workflow.code)
        } else {
            self.workflow.name.clone()
        };

        Ok(WorkflowDefinition {
            code: self.workflow.code,
            version,
            name,
            tasks,
            relations,
            global_params: self.global_params.clone(),
            timeout: self.workflow.timeout.clone(),
            schedules: self.workflow.schedules.clone(),
        })
    }
}
