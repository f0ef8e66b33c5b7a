// src/types.rs

//! Status and policy enums shared by the model, the DAG layer and the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Execution status of a single task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExecutionStatus {
    SubmittedSuccess,
    Dispatch,
    RunningExecution,
    DelayExecution,
    Pause,
    Stop,
    Kill,
    Failure,
    NeedFaultTolerance,
    Success,
    ForcedSuccess,
    /// No concurrency slot was available (e.g. for a sub-workflow).
    WaitingThread,
}

impl TaskExecutionStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::ForcedSuccess)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failure | Self::NeedFaultTolerance)
    }

    pub fn is_kill(self) -> bool {
        matches!(self, Self::Stop | Self::Kill)
    }

    pub fn is_pause(self) -> bool {
        matches!(self, Self::Pause)
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::SubmittedSuccess | Self::Dispatch | Self::RunningExecution | Self::DelayExecution
        )
    }

    pub fn is_finished(self) -> bool {
        self.is_success()
            || self.is_failure()
            || self.is_kill()
            || self.is_pause()
            || self == Self::WaitingThread
    }
}

/// Aggregate state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    SubmittedSuccess,
    Running,
    ReadyPause,
    Pause,
    ReadyStop,
    Stop,
    Failure,
    Success,
    Delayed,
    WaitingThread,
}

impl WorkflowState {
    /// Terminal states end a DAG pass.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Pause | Self::Stop | Self::Failure | Self::Success | Self::WaitingThread
        )
    }

    pub fn is_ready_stop(self) -> bool {
        self == Self::ReadyStop
    }

    pub fn is_ready_pause(self) -> bool {
        self == Self::ReadyPause
    }

    /// Pending states the aggregator must not overwrite with RUNNING.
    pub fn is_sticky(self) -> bool {
        matches!(
            self,
            Self::ReadyStop | Self::ReadyPause | Self::WaitingThread | Self::Delayed
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the instance came to exist; drives graph selection and recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Start,
    RecoverFailure,
    RecoverSuspended,
    Backfill,
    RepeatRun,
    RecoverToleranceFault,
    ExecuteSubset,
}

impl CommandType {
    /// Commands that resume an existing instance row instead of creating one.
    pub fn resumes_existing(self) -> bool {
        matches!(
            self,
            Self::RecoverFailure
                | Self::RecoverSuspended
                | Self::RepeatRun
                | Self::RecoverToleranceFault
        )
    }
}

/// Behaviour of the instance after an irrecoverable task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStrategy {
    /// Stop every other running task.
    #[default]
    End,
    /// Let independent branches finish.
    Continue,
}

impl FromStr for FailureStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "end" => Ok(FailureStrategy::End),
            "continue" => Ok(FailureStrategy::Continue),
            other => Err(format!(
                "invalid failure strategy: {other} (expected \"end\" or \"continue\")"
            )),
        }
    }
}

/// Scheduling priority; greater values are served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Medium,
    High,
    Highest,
}

/// Task type tag. Worker types run remotely; the rest are evaluated by the
/// master itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TaskType {
    Shell,
    Sql,
    SubWorkflow,
    Conditions,
    Switch,
    Dependent,
    /// Any other worker-side plugin type, passed through verbatim.
    Other(String),
}

impl TaskType {
    pub fn is_conditions(&self) -> bool {
        *self == TaskType::Conditions
    }

    pub fn is_switch(&self) -> bool {
        *self == TaskType::Switch
    }

    pub fn is_sub_workflow(&self) -> bool {
        *self == TaskType::SubWorkflow
    }

    /// Tasks that carry a branch decision for their successors.
    pub fn is_branching(&self) -> bool {
        self.is_conditions() || self.is_switch()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Shell => f.write_str("SHELL"),
            TaskType::Sql => f.write_str("SQL"),
            TaskType::SubWorkflow => f.write_str("SUB_WORKFLOW"),
            TaskType::Conditions => f.write_str("CONDITIONS"),
            TaskType::Switch => f.write_str("SWITCH"),
            TaskType::Dependent => f.write_str("DEPENDENT"),
            TaskType::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase().replace('-', "_");
        Ok(match upper.as_str() {
            "SHELL" => TaskType::Shell,
            "SQL" => TaskType::Sql,
            "SUB_WORKFLOW" | "SUB_PROCESS" => TaskType::SubWorkflow,
            "CONDITIONS" => TaskType::Conditions,
            "SWITCH" => TaskType::Switch,
            "DEPENDENT" => TaskType::Dependent,
            "" => return Err("task type must not be empty".to_string()),
            _ => TaskType::Other(upper),
        })
    }
}

/// Which part of the graph a start/recovery node list selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskDependType {
    /// The node only.
    TaskOnly,
    /// The node and all of its ancestors.
    TaskPre,
    /// The node and all of its descendants.
    #[default]
    TaskPost,
}

impl FromStr for TaskDependType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TASK_ONLY" => Ok(TaskDependType::TaskOnly),
            "TASK_PRE" => Ok(TaskDependType::TaskPre),
            "TASK_POST" => Ok(TaskDependType::TaskPost),
            other => Err(format!("invalid task depend type: {other}")),
        }
    }
}

/// What happens when a task or workflow exceeds its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutStrategy {
    #[default]
    Warn,
    Failed,
}

impl TryFrom<String> for TaskType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        value.to_string()
    }
}
