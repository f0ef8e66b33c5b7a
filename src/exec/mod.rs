// src/exec/mod.rs

//! Task execution layer.
//!
//! This module is responsible for moving single tasks through their
//! lifecycle and, for SHELL tasks, for actually running them with
//! `tokio::process::Command`.
//!
//! - [`processor`] defines the `TaskProcessor` trait and the registry that
//!   resolves a processor per task type.
//! - [`remote`], [`logic`], [`dependent`] and [`sub_workflow`] are the
//!   built-in processors.
//! - [`backend`] provides the `DispatchClient` trait and the
//!   `LocalShellDispatcher` the binary uses; tests replace it with a fake.
//! - [`executor_loop`] owns the local worker loop which manages task
//!   processes, and [`task_runner`] runs a single process.

pub mod backend;
pub mod dependent;
pub mod executor_loop;
pub mod logic;
pub mod processor;
pub mod remote;
pub mod sub_workflow;
pub mod task_runner;

pub use backend::{DispatchClient, LocalShellDispatcher, WorkerRequest};
pub use executor_loop::spawn_executor;
pub use processor::{ProcessOutcome, ProcessorEnv, ProcessorRegistry, TaskProcessor};
