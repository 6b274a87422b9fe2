// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `pipedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipedag",
    version,
    about = "Run data pipeline units as a dependency DAG, on demand or on a cron schedule.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Pipedag.toml")]
    pub config: String,

    /// Run this job once and exit.
    ///
    /// Accepts a configured job name or a selection expression
    /// (`all`, `group:<name>`, `unit:<name>`). Without this flag the
    /// configured schedules run until Ctrl-C.
    #[arg(long, value_name = "NAME|SELECTION")]
    pub job: Option<String>,

    /// Upper bound on concurrently running units (overrides the config).
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_parallelism: Option<u32>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the DAG, jobs and schedules, but don't run
    /// anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print run summaries as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
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

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
