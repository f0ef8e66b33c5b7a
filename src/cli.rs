// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::FailureStrategy;

/// Command-line arguments for `dagmaster`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagmaster",
    version,
    about = "Run a workflow DAG through the dagmaster execution engine.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    ///
    /// Default: `Workflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Workflow.toml")]
    pub workflow: String,

    /// TOML file with an `[engine]` table. Built-in defaults when omitted.
    #[arg(long, value_name = "PATH")]
    pub engine_config: Option<String>,

    /// First backfill date (YYYY-MM-DD); runs one pass per day.
    #[arg(long, value_name = "DATE", requires = "backfill_end")]
    pub backfill_start: Option<String>,

    /// Last backfill date (YYYY-MM-DD), inclusive.
    #[arg(long, value_name = "DATE", requires = "backfill_start")]
    pub backfill_end: Option<String>,

    /// Run only the tasks named here and everything downstream of them.
    #[arg(long = "task", value_name = "NAME", conflicts_with = "backfill_start")]
    pub tasks: Vec<String>,

    /// Override the workflow's failure strategy (end, continue).
    #[arg(long, value_name = "STRATEGY")]
    pub failure_strategy: Option<FailureStrategy>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGMASTER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the DAG, but don't execute any task.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
