// src/logging.rs

//! Logging setup for `pipedag` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `PIPEDAG_LOG` environment variable, in `EnvFilter` syntax
//!    (e.g. "debug" or "pipedag::exec=debug,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout carries only run summaries.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "PIPEDAG_LOG";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>) -> EnvFilter {
    match cli_level {
        Some(lvl) => EnvFilter::new(lvl.as_str()),
        None => EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
    }
}
