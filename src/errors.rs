// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::model::{InstanceId, TaskCode, TaskInstanceId, WorkflowCode};

#[derive(Error, Debug)]
pub enum DagmasterError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Edge {from} -> {to} references unknown task {missing}")]
    UnknownTask {
        from: TaskCode,
        to: TaskCode,
        missing: TaskCode,
    },

    #[error("Workflow definition not found: {code} v{version}")]
    DefinitionNotFound { code: WorkflowCode, version: u32 },

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Task instance not found: {0}")]
    TaskInstanceNotFound(TaskInstanceId),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Submitting task {task_code} failed after {attempts} attempts")]
    SubmitExhausted { task_code: TaskCode, attempts: u32 },

    #[error("Workflow instance {0} is already scheduled")]
    AlreadyScheduled(InstanceId),

    #[error("Instance pool saturated ({0} live instances)")]
    PoolSaturated(usize),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid parameters for task {task_code}: {message}")]
    InvalidTaskParams { task_code: TaskCode, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagmasterError>;
