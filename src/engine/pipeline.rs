// src/engine/pipeline.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::dag::{
    Job, JobDefinition, JobSelector, Scheduler, SchedulerStep, Unit, UnitOutcome, UnitRegistry,
};
use crate::engine::stop::StopSignal;
use crate::engine::summary::{FailureReason, RunResult, RunSummary};
use crate::errors::{PipelineError, Result};
use crate::exec::{UnitExecutor, UnitRunner};
use crate::types::{UnitName, UnitStatus};

/// Default worker count: the number of CPUs available to the process.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// The DAG scheduler's async shell.
///
/// Owns the shared registry, the named job definitions and the executor, and
/// drives one [`Scheduler`] state machine per run:
/// - dispatches ready units up to `max_parallelism` at a time
/// - feeds each terminal result back into the state machine
/// - records a skipped result for every unit the state machine skips
pub struct Pipeline {
    registry: Arc<UnitRegistry>,
    executor: Arc<dyn UnitExecutor>,
    jobs: BTreeMap<String, JobDefinition>,
    max_parallelism: usize,
    /// Monotonically increasing run ID.
    run_counter: AtomicU64,
}

impl Pipeline {
    /// Pipeline over `registry` using the real [`UnitRunner`].
    pub fn new(registry: Arc<UnitRegistry>) -> Self {
        Self {
            registry,
            executor: Arc::new(UnitRunner::new()),
            jobs: BTreeMap::new(),
            max_parallelism: default_parallelism(),
            run_counter: AtomicU64::new(0),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn UnitExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Clamped to at least one worker.
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism.max(1);
        self
    }

    /// Declare a named job.
    ///
    /// The selection is checked against the registry now so that a bad
    /// definition fails at setup; it is resolved again on every run.
    pub fn define_job(&mut self, definition: JobDefinition) -> Result<()> {
        if self.jobs.contains_key(&definition.name) {
            return Err(PipelineError::ConfigError(format!(
                "job '{}' is defined twice",
                definition.name
            )));
        }
        JobSelector::new(&self.registry).resolve_all(&definition.selection)?;
        debug!(job = %definition.name, selection = ?definition.selection, "defined job");
        self.jobs.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Builder-style [`Pipeline::define_job`].
    pub fn with_job(mut self, definition: JobDefinition) -> Result<Self> {
        self.define_job(definition)?;
        Ok(self)
    }

    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn job_definition(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.get(name)
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(|s| s.as_str())
    }

    /// Resolve a configured job name, or failing that a selection
    /// expression, into a job.
    pub fn resolve(&self, name_or_selection: &str) -> Result<Job> {
        match self.jobs.get(name_or_selection) {
            Some(def) => def.to_job(&self.registry),
            None => Job::from_selection(&self.registry, name_or_selection, &[name_or_selection]),
        }
    }

    /// Submit a selection expression (`all`, `group:<g>`, `unit:<u>`) and run
    /// it to completion.
    pub async fn submit(&self, selection: &str) -> Result<RunSummary> {
        let job = Job::from_selection(&self.registry, selection, &[selection])?;
        Ok(self.run(&job).await)
    }

    /// Run a configured job by name.
    pub async fn run_job(&self, name: &str) -> Result<RunSummary> {
        self.run_job_with_stop(name, StopSignal::never()).await
    }

    pub async fn run_job_with_stop(&self, name: &str, stop: StopSignal) -> Result<RunSummary> {
        let def = self
            .jobs
            .get(name)
            .ok_or_else(|| PipelineError::UnknownJob(name.to_string()))?;
        let job = def.to_job(&self.registry)?;
        Ok(self.run_with_stop(&job, stop).await)
    }

    /// Run `job` to completion.
    pub async fn run(&self, job: &Job) -> RunSummary {
        self.run_with_stop(job, StopSignal::never()).await
    }

    /// Run `job`, honouring `stop`: once it fires, no further units are
    /// dispatched and in-flight units are left to finish or time out.
    pub async fn run_with_stop(&self, job: &Job, mut stop: StopSignal) -> RunSummary {
        let run_id = self.run_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = Utc::now();
        let span = info_span!("run", run_id, job = %job.name());

        async {
            info!(
                units = job.graph().len(),
                max_parallelism = self.max_parallelism,
                "starting job run"
            );

            let mut scheduler = Scheduler::new(job.graph().clone());
            let mut results: BTreeMap<UnitName, RunResult> = BTreeMap::new();
            let (done_tx, mut done_rx) = mpsc::channel::<RunResult>(job.graph().len().max(1));
            let mut in_flight = 0usize;

            scheduler.start();
            if stop.is_stopped() {
                record_skipped(&mut results, scheduler.request_stop());
            }

            loop {
                while in_flight < self.max_parallelism {
                    let Some(name) = scheduler.next_ready() else {
                        break;
                    };
                    match self.registry.get(&name) {
                        Some(unit) => {
                            self.dispatch(Arc::clone(unit), done_tx.clone());
                            in_flight += 1;
                        }
                        None => {
                            error!(unit = %name, "ready unit missing from registry");
                            let now = Utc::now();
                            let result = RunResult::failed(
                                name.clone(),
                                FailureReason::execution("unit is not registered"),
                                now,
                                now,
                                std::time::Duration::ZERO,
                            );
                            let step = scheduler.handle_completion(&name, UnitOutcome::Failed);
                            results.insert(name, result);
                            record_skipped(&mut results, step);
                        }
                    }
                }

                if in_flight == 0 && !scheduler.has_ready() {
                    break;
                }

                tokio::select! {
                    Some(result) = done_rx.recv() => {
                        in_flight -= 1;
                        let outcome = if result.is_success() {
                            UnitOutcome::Succeeded
                        } else {
                            UnitOutcome::Failed
                        };
                        let step = scheduler.handle_completion(&result.unit, outcome);
                        results.insert(result.unit.clone(), result);
                        record_skipped(&mut results, step);
                    }
                    _ = stop.requested(), if !scheduler.is_stopping() => {
                        info!(in_flight, "stop requested; dispatching no further units");
                        record_skipped(&mut results, scheduler.request_stop());
                    }
                    else => break,
                }
            }

            // Every member must end terminal, even if the loop exited early.
            for name in job.units() {
                if !results.contains_key(name) {
                    warn!(unit = %name, "unit left without a result; recording as skipped");
                    results.insert(
                        name.to_string(),
                        RunResult::skipped(name, FailureReason::Stopped),
                    );
                }
            }

            let summary = RunSummary::new(run_id, job.name(), started_at, results, scheduler.is_stopping());
            log_summary(&summary);
            summary
        }
        .instrument(span)
        .await
    }

    /// Spawn one unit on the executor; its result is sent to `done_tx`.
    fn dispatch(&self, unit: Arc<Unit>, done_tx: mpsc::Sender<RunResult>) {
        let executor = Arc::clone(&self.executor);
        let name = unit.name().to_string();
        debug!(unit = %name, "dispatching unit to executor");

        tokio::spawn(
            async move {
                let started_at = Utc::now();
                let clock = std::time::Instant::now();
                let handle = tokio::spawn(async move { executor.execute(unit).await });

                let result = match handle.await {
                    Ok(result) => result,
                    Err(err) => RunResult::failed(
                        name.clone(),
                        FailureReason::execution(format!("executor task failed: {err}")),
                        started_at,
                        Utc::now(),
                        clock.elapsed(),
                    ),
                };

                if done_tx.send(result).await.is_err() {
                    warn!(unit = %name, "run loop gone before unit result was delivered");
                }
            }
            .in_current_span(),
        );
    }
}

fn record_skipped(results: &mut BTreeMap<UnitName, RunResult>, step: SchedulerStep) {
    for skipped in step.newly_skipped {
        let reason = FailureReason::from(skipped.cause);
        results.insert(skipped.unit.clone(), RunResult::skipped(skipped.unit, reason));
    }
}

fn log_summary(summary: &RunSummary) {
    let failed: BTreeSet<&str> = summary
        .units_with_status(UnitStatus::Failed)
        .into_iter()
        .collect();
    let skipped = summary.units_with_status(UnitStatus::Skipped).len();

    if summary.is_success() {
        info!(
            status = %summary.status,
            units = summary.results.len(),
            skipped,
            stopped = summary.stopped,
            "job run finished"
        );
    } else {
        warn!(
            status = %summary.status,
            units = summary.results.len(),
            failed = ?failed,
            skipped,
            "job run finished with failures"
        );
    }
}
