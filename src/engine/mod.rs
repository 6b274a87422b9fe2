// src/engine/mod.rs

//! Orchestration engine for pipedag.
//!
//! This module ties together:
//! - the DAG scheduler state machine (see [`crate::dag::Scheduler`])
//! - the executor that runs dispatched units
//! - cooperative stop requests
//! - per-unit results and the per-run summary
//!
//! The pure state machine lives in `dag`; the async shell that dispatches
//! units and gathers their results is [`pipeline::Pipeline`].

pub mod pipeline;
pub mod stop;
pub mod summary;

pub use pipeline::{default_parallelism, Pipeline};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use summary::{FailureReason, RunResult, RunSummary};
