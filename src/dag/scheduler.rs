// src/dag/scheduler.rs

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::dag::graph::DagGraph;
use crate::types::{UnitName, UnitStatus};

/// Per-run state of a unit (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    /// Waiting on in-job predecessors.
    Pending,
    /// Predecessors satisfied; waiting for a free worker.
    Ready,
    /// Handed to the executor.
    Running,
    Succeeded,
    Failed,
    /// Never dispatched because an ancestor failed or a stop was requested.
    Skipped,
}

impl From<UnitState> for UnitStatus {
    fn from(state: UnitState) -> Self {
        match state {
            UnitState::Pending | UnitState::Ready => UnitStatus::Pending,
            UnitState::Running => UnitStatus::Running,
            UnitState::Succeeded => UnitStatus::Succeeded,
            UnitState::Failed => UnitStatus::Failed,
            UnitState::Skipped => UnitStatus::Skipped,
        }
    }
}

/// Terminal outcome reported back for a dispatched unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    Failed,
}

/// Why a unit was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCause {
    /// The named ancestor failed.
    UpstreamFailed(UnitName),
    /// A stop was requested before the unit could be dispatched.
    StopRequested,
}

/// A unit that was moved to `Skipped` during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedUnit {
    pub unit: UnitName,
    pub cause: SkipCause,
}

/// Structured result of a single scheduler step.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Units that became ready to dispatch as a result of this step.
    pub newly_ready: Vec<UnitName>,
    /// Units newly marked as skipped in this step.
    pub newly_skipped: Vec<SkippedUnit>,
    /// Whether every unit is now terminal.
    pub run_just_finished: bool,
}

/// Per-run state machine over a job's induced sub-DAG.
///
/// It decides which units are ready, records outcomes, and skips the
/// transitive dependents of failed units. It performs no IO; the engine
/// drives it and owns the actual dispatch.
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    states: HashMap<UnitName, UnitState>,
    /// Ready units in the order they became ready.
    ready: VecDeque<UnitName>,
    stopping: bool,
}

impl Scheduler {
    /// Create a scheduler with every member of `graph` pending.
    pub fn new(graph: DagGraph) -> Self {
        let states = graph
            .units()
            .map(|n| (n.to_string(), UnitState::Pending))
            .collect();

        Self {
            graph,
            states,
            ready: VecDeque::new(),
            stopping: false,
        }
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Seed the run: every unit without in-job predecessors becomes ready.
    pub fn start(&mut self) -> SchedulerStep {
        let newly_ready = self.collect_new_ready_units();
        debug!(ready = ?newly_ready, "scheduler: run started");
        SchedulerStep {
            newly_ready,
            newly_skipped: Vec::new(),
            run_just_finished: self.is_finished(),
        }
    }

    /// Take the next ready unit and mark it running.
    pub fn next_ready(&mut self) -> Option<UnitName> {
        while let Some(name) = self.ready.pop_front() {
            if let Some(state) = self.states.get_mut(&name) {
                if *state == UnitState::Ready {
                    *state = UnitState::Running;
                    return Some(name);
                }
            }
        }
        None
    }

    /// Record the terminal outcome of a running unit.
    ///
    /// - On success, dependents whose predecessors have all succeeded become
    ///   ready.
    /// - On failure, every pending transitive dependent is skipped.
    pub fn handle_completion(&mut self, unit: &str, outcome: UnitOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        match self.states.get_mut(unit) {
            Some(state) if *state == UnitState::Running => match outcome {
                UnitOutcome::Succeeded => {
                    *state = UnitState::Succeeded;
                    debug!(unit = %unit, "unit succeeded");
                    step.newly_ready = self.collect_new_ready_units();
                }
                UnitOutcome::Failed => {
                    *state = UnitState::Failed;
                    debug!(unit = %unit, "unit failed; skipping dependents in this run");
                    step.newly_skipped = self.mark_dependents_skipped(unit);
                }
            },
            Some(state) => {
                warn!(unit = %unit, state = ?state, "completion for unit that is not running; ignoring");
            }
            None => {
                warn!(unit = %unit, "completion for unit outside this job; ignoring");
            }
        }

        step.run_just_finished = self.is_finished();
        step
    }

    /// Stop dispatching: every pending or ready unit is skipped. Running
    /// units are left alone and may still complete.
    pub fn request_stop(&mut self) -> SchedulerStep {
        self.stopping = true;
        self.ready.clear();

        let mut newly_skipped = Vec::new();
        for name in self.graph.units() {
            if let Some(state) = self.states.get_mut(name) {
                if matches!(state, UnitState::Pending | UnitState::Ready) {
                    *state = UnitState::Skipped;
                    newly_skipped.push(SkippedUnit {
                        unit: name.to_string(),
                        cause: SkipCause::StopRequested,
                    });
                }
            }
        }

        debug!(skipped = newly_skipped.len(), "scheduler: stop requested");
        SchedulerStep {
            newly_ready: Vec::new(),
            newly_skipped,
            run_just_finished: self.is_finished(),
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// `true` when no unit is pending, ready or running.
    pub fn is_finished(&self) -> bool {
        !self.states.values().any(|s| {
            matches!(
                s,
                UnitState::Pending | UnitState::Ready | UnitState::Running
            )
        })
    }

    /// Whether any unit is waiting for a worker.
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Read-only view of a unit's status, `None` if it is not in the job.
    pub fn status_of(&self, unit: &str) -> Option<UnitStatus> {
        self.states.get(unit).map(|s| (*s).into())
    }

    /// Whether every in-job predecessor of `unit` has succeeded.
    ///
    /// Returns `None` if the unit is not in the job.
    pub fn deps_satisfied(&self, unit: &str) -> Option<bool> {
        if !self.states.contains_key(unit) {
            return None;
        }
        Some(self.deps_succeeded(unit))
    }

    /// Units currently marked running.
    pub fn running_units(&self) -> Vec<UnitName> {
        self.graph
            .units()
            .filter(|n| self.states.get(*n) == Some(&UnitState::Running))
            .map(str::to_string)
            .collect()
    }

    fn deps_succeeded(&self, unit: &str) -> bool {
        self.graph
            .dependencies_of(unit)
            .iter()
            .all(|dep| self.states.get(dep) == Some(&UnitState::Succeeded))
    }

    /// Move pending units whose predecessors all succeeded to `Ready`, in
    /// topological order.
    fn collect_new_ready_units(&mut self) -> Vec<UnitName> {
        if self.stopping {
            return Vec::new();
        }

        let candidates: Vec<UnitName> = self
            .graph
            .units()
            .filter(|n| self.states.get(*n) == Some(&UnitState::Pending) && self.deps_succeeded(n))
            .map(str::to_string)
            .collect();

        for name in &candidates {
            if let Some(state) = self.states.get_mut(name) {
                *state = UnitState::Ready;
            }
            self.ready.push_back(name.clone());
        }

        candidates
    }

    /// Skip every pending transitive dependent of `failed`.
    fn mark_dependents_skipped(&mut self, failed: &str) -> Vec<SkippedUnit> {
        let mut skipped = Vec::new();
        let mut stack: Vec<UnitName> = self.graph.dependents_of(failed).to_vec();

        while let Some(name) = stack.pop() {
            let Some(state) = self.states.get_mut(&name) else {
                continue;
            };
            if *state != UnitState::Pending {
                // Already skipped through another path, or cannot be
                // downstream of a running unit.
                continue;
            }

            *state = UnitState::Skipped;
            debug!(unit = %name, upstream = %failed, "skipping unit due to upstream failure");
            skipped.push(SkippedUnit {
                unit: name.clone(),
                cause: SkipCause::UpstreamFailed(failed.to_string()),
            });
            stack.extend(self.graph.dependents_of(&name).iter().cloned());
        }

        skipped
    }
}
