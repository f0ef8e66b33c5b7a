// src/config/mod.rs

//! Configuration loading and validation for dagmaster.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`): engine tuning and
//!   workflow files.
//! - Load files from disk (`loader.rs`).
//! - Validate basic invariants like DAG correctness (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_workflow_path, load_and_validate, load_engine_config, load_from_path};
pub use model::{EngineConfig, RawWorkflowFile, TaskConfig, WorkflowFile, WorkflowSection};
pub use validate::{validate_engine, validate_workflow};
