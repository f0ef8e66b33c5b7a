// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{EngineConfig, EngineConfigFile, RawWorkflowFile, WorkflowFile};
use crate::config::validate::validate_engine;
use crate::errors::Result;

/// Load a workflow file from a given path and return the raw
/// `RawWorkflowFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (DAG correctness, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let raw: RawWorkflowFile = toml::from_str(&contents)?;
    Ok(raw)
}

/// Load a workflow file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde`).
/// - Checks for:
///   - an empty task set,
///   - duplicate task codes,
///   - unknown or self `after` references,
///   - DAG cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowFile> {
    let raw = load_from_path(&path)?;
    WorkflowFile::try_from(raw)
}

/// Read the `[engine]` table of `path`, or the defaults when no path is
/// given.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let contents = fs::read_to_string(path)?;
            toml::from_str::<EngineConfigFile>(&contents)?.engine
        }
        None => EngineConfig::default(),
    };
    validate_engine(&config)?;
    Ok(config)
}

/// `Workflow.toml` in the current working directory.
pub fn default_workflow_path() -> PathBuf {
    PathBuf::from("Workflow.toml")
}
