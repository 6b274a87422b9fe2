// src/exec/runner.rs

//! Single-unit runner with deadline enforcement.

use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::dag::Unit;
use crate::engine::{FailureReason, RunResult};

/// Executes one unit's action under its declared timeout.
///
/// The action runs in its own Tokio task so that a panic is contained and a
/// timeout can abort it. Aborting drops the action's future, which kills any
/// child process spawned with `kill_on_drop`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitRunner;

impl UnitRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `unit` to a terminal result. Never returns an error.
    pub async fn run_unit(&self, unit: &Unit) -> RunResult {
        let name = unit.name().to_string();
        let timeout = unit.timeout();

        info!(
            unit = %name,
            group = %unit.group(),
            timeout_ms = timeout.as_millis() as u64,
            "starting unit"
        );

        let started_at = Utc::now();
        let clock = Instant::now();

        let mut handle = tokio::spawn(unit.action().run());

        let outcome = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(metadata))) => Ok(metadata),
            Ok(Ok(Err(err))) => Err(FailureReason::execution(format!("{err:#}"))),
            Ok(Err(join_err)) => Err(FailureReason::execution(format!(
                "action aborted: {join_err}"
            ))),
            Err(_elapsed) => {
                handle.abort();
                Err(FailureReason::Timeout { after: timeout })
            }
        };

        let duration = clock.elapsed();
        let finished_at = Utc::now();

        match outcome {
            Ok(metadata) => {
                info!(
                    unit = %name,
                    elapsed_ms = duration.as_millis() as u64,
                    metadata = ?metadata,
                    "unit succeeded"
                );
                RunResult::succeeded(name, started_at, finished_at, duration, metadata)
            }
            Err(reason) => {
                warn!(
                    unit = %name,
                    elapsed_ms = duration.as_millis() as u64,
                    reason = %reason,
                    "unit failed"
                );
                RunResult::failed(name, reason, started_at, finished_at, duration)
            }
        }
    }
}
