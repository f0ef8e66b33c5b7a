// src/logging.rs

//! Logging setup for `dagmaster` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `DAGMASTER_LOG` environment variable, in `EnvFilter` syntax
//!    (e.g. "info" or "dagmaster::engine=debug,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for the run summary.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "DAGMASTER_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    fmt()
        .with_env_filter(build_filter(cli_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>) -> EnvFilter {
    match cli_level {
        Some(lvl) => EnvFilter::new(directive_for(lvl)),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

fn directive_for(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
