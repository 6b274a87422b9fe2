// src/trigger/mod.rs

//! Time-based job submission.
//!
//! - [`schedule`] parses cron expressions and computes fire times (UTC).
//! - [`queue`] enforces one in-flight run per job and defers overlapping
//!   firings.
//! - [`service`] is the background loop that fires triggers and broadcasts
//!   run summaries.

pub mod queue;
pub mod schedule;
pub mod service;

pub use queue::{FireDecision, FiringQueue};
pub use schedule::CronSchedule;
pub use service::{TriggerHandle, TriggerService, TriggerServiceHandle};
