// src/exec/mod.rs

//! Unit execution layer.
//!
//! - [`runner`] runs a single unit under its timeout and turns every outcome
//!   into a [`RunResult`](crate::engine::RunResult).
//! - [`backend`] provides the `UnitExecutor` trait the pipeline dispatches
//!   through, so tests can wrap or replace the real runner.
//! - [`command`] implements unit actions that run shell commands via
//!   `tokio::process::Command`.
//! - [`probe`] evaluates filesystem probes into metadata after a command
//!   succeeded.

pub mod backend;
pub mod command;
pub mod probe;
pub mod runner;

pub use backend::UnitExecutor;
pub use command::{CommandAction, CommandSpec};
pub use probe::Probe;
pub use runner::UnitRunner;
