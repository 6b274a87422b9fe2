// src/engine/summary.rs

//! Per-unit run results and the per-job run summary.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dag::SkipCause;
use crate::types::{Metadata, RunStatus, UnitName, UnitStatus};

/// Why a unit did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The action returned an error or its process exited non-zero.
    Execution { message: String },
    /// The action exceeded the unit's timeout.
    Timeout { after: Duration },
    /// An ancestor failed, so the unit was never dispatched.
    DependencyFailed { upstream: UnitName },
    /// A stop was requested before the unit was dispatched.
    Stopped,
}

impl FailureReason {
    pub fn execution(message: impl Into<String>) -> Self {
        FailureReason::Execution {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureReason::Timeout { .. })
    }
}

impl From<SkipCause> for FailureReason {
    fn from(cause: SkipCause) -> Self {
        match cause {
            SkipCause::UpstreamFailed(upstream) => FailureReason::DependencyFailed { upstream },
            SkipCause::StopRequested => FailureReason::Stopped,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Execution { message } => write!(f, "execution failed: {message}"),
            FailureReason::Timeout { after } => write!(f, "Timeout after {after:?}"),
            FailureReason::DependencyFailed { upstream } => {
                write!(f, "dependency '{upstream}' failed")
            }
            FailureReason::Stopped => f.write_str("stop requested before dispatch"),
        }
    }
}

/// Terminal record of one unit within a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub unit: UnitName,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// `None` for skipped units.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub metadata: Metadata,
}

impl RunResult {
    pub fn succeeded(
        unit: impl Into<UnitName>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        duration: Duration,
        metadata: Metadata,
    ) -> Self {
        Self {
            unit: unit.into(),
            status: UnitStatus::Succeeded,
            reason: None,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            duration: Some(duration),
            metadata,
        }
    }

    pub fn failed(
        unit: impl Into<UnitName>,
        reason: FailureReason,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            unit: unit.into(),
            status: UnitStatus::Failed,
            reason: Some(reason),
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            duration: Some(duration),
            metadata: Metadata::new(),
        }
    }

    pub fn skipped(unit: impl Into<UnitName>, reason: FailureReason) -> Self {
        Self {
            unit: unit.into(),
            status: UnitStatus::Skipped,
            reason: Some(reason),
            started_at: None,
            finished_at: None,
            duration: None,
            metadata: Metadata::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Succeeded
    }
}

/// Outcome of one job run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: u64,
    pub job: String,
    pub status: RunStatus,
    /// Whether a stop request cut the run short.
    pub stopped: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: BTreeMap<UnitName, RunResult>,
}

impl RunSummary {
    /// Assemble a summary; the overall status is `failed` iff any unit
    /// failed.
    pub fn new(
        run_id: u64,
        job: impl Into<String>,
        started_at: DateTime<Utc>,
        results: BTreeMap<UnitName, RunResult>,
        stopped: bool,
    ) -> Self {
        let status = if results.values().any(|r| r.status == UnitStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        Self {
            run_id,
            job: job.into(),
            status,
            stopped,
            started_at,
            finished_at: Utc::now(),
            results,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn status_of(&self, unit: &str) -> Option<UnitStatus> {
        self.results.get(unit).map(|r| r.status)
    }

    pub fn result_of(&self, unit: &str) -> Option<&RunResult> {
        self.results.get(unit)
    }

    /// Unit name → status, ignoring timing and metadata.
    pub fn statuses(&self) -> BTreeMap<UnitName, UnitStatus> {
        self.results
            .iter()
            .map(|(name, r)| (name.clone(), r.status))
            .collect()
    }

    pub fn units_with_status(&self, status: UnitStatus) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.unit.as_str())
            .collect()
    }

    /// Human-readable multi-line report.
    pub fn render(&self) -> String {
        let mut out = format!(
            "job '{}' (run {}) {}{}\n",
            self.job,
            self.run_id,
            self.status,
            if self.stopped { " [stopped]" } else { "" }
        );

        let width = self.results.keys().map(String::len).max().unwrap_or(0);
        for result in self.results.values() {
            out.push_str(&format!("  {:<width$}  {:<9}", result.unit, result.status));
            if let Some(d) = result.duration {
                out.push_str(&format!("  {:>8.2}s", d.as_secs_f64()));
            }
            if let Some(reason) = &result.reason {
                out.push_str(&format!("  {reason}"));
            }
            if !result.metadata.is_empty() {
                let pairs: Vec<String> = result
                    .metadata
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                out.push_str(&format!("  [{}]", pairs.join(", ")));
            }
            out.push('\n');
        }

        out
    }
}
