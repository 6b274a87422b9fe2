// src/trigger/queue.rs

use std::collections::HashMap;

use tracing::{debug, warn};

/// What to do with a trigger firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// No run of the job is in flight; start one now.
    Start,
    /// A run is in flight; the firing was remembered and will start when it
    /// finishes.
    Deferred,
    /// A run is in flight and the deferred slots are full; the firing is
    /// dropped.
    Dropped,
}

#[derive(Debug, Default, Clone, Copy)]
struct JobSlot {
    in_flight: bool,
    deferred: usize,
}

/// Overlap control for triggered job runs.
///
/// Semantics:
/// - At most one run per job is in flight at any time.
/// - Firings that arrive while a run is in flight are deferred, up to
///   `queue_length` per job. Further firings are dropped.
/// - When a run finishes, one deferred firing (if any) starts immediately.
///
/// Different jobs never block each other here; unit-level concurrency is
/// bounded by the pipeline's worker limit.
#[derive(Debug)]
pub struct FiringQueue {
    queue_length: usize,
    jobs: HashMap<String, JobSlot>,
}

impl FiringQueue {
    /// `queue_length` is clamped to at least 1, so one overlapping firing is
    /// always remembered.
    pub fn new(queue_length: usize) -> Self {
        Self {
            queue_length: queue_length.max(1),
            jobs: HashMap::new(),
        }
    }

    pub fn queue_length(&self) -> usize {
        self.queue_length
    }

    /// Record a firing for `job` and decide what to do with it.
    pub fn on_fire(&mut self, job: &str) -> FireDecision {
        let slot = self.jobs.entry(job.to_string()).or_default();

        if !slot.in_flight {
            slot.in_flight = true;
            debug!(job = %job, "no run in flight; starting");
            return FireDecision::Start;
        }

        if slot.deferred < self.queue_length {
            slot.deferred += 1;
            debug!(job = %job, deferred = slot.deferred, "run in flight; deferring firing");
            FireDecision::Deferred
        } else {
            warn!(
                job = %job,
                queue_length = self.queue_length,
                "run in flight and deferred firings at capacity; dropping firing"
            );
            FireDecision::Dropped
        }
    }

    /// Record that the in-flight run of `job` finished.
    ///
    /// Returns `true` if a deferred firing should start now; the job then
    /// counts as in flight again.
    pub fn on_finished(&mut self, job: &str) -> bool {
        let Some(slot) = self.jobs.get_mut(job) else {
            warn!(job = %job, "finish reported for job that was never started");
            return false;
        };

        if slot.deferred > 0 {
            slot.deferred -= 1;
            slot.in_flight = true;
            debug!(job = %job, remaining = slot.deferred, "starting deferred firing");
            true
        } else {
            slot.in_flight = false;
            false
        }
    }

    pub fn is_in_flight(&self, job: &str) -> bool {
        self.jobs.get(job).is_some_and(|s| s.in_flight)
    }

    pub fn deferred(&self, job: &str) -> usize {
        self.jobs.get(job).map_or(0, |s| s.deferred)
    }

    /// Whether any job has a run in flight.
    pub fn is_idle(&self) -> bool {
        !self.jobs.values().any(|s| s.in_flight)
    }

    /// Forget all deferred firings (used on shutdown).
    pub fn clear_deferred(&mut self) -> usize {
        let mut dropped = 0;
        for slot in self.jobs.values_mut() {
            dropped += slot.deferred;
            slot.deferred = 0;
        }
        dropped
    }
}
