// src/trigger/service.rs

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::engine::{stop_channel, Pipeline, RunSummary, StopHandle};
use crate::errors::{PipelineError, Result};
use crate::trigger::queue::{FireDecision, FiringQueue};
use crate::trigger::schedule::CronSchedule;

/// How many finished summaries a slow subscriber may lag behind.
const SUMMARY_CHANNEL_CAPACITY: usize = 64;

/// Upper bound on a single sleep when no trigger is due.
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// A declared trigger: a cron schedule bound to a job name.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    name: String,
    job: String,
    schedule: CronSchedule,
}

impl TriggerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.next_after(after)
    }
}

impl fmt::Display for TriggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.name, self.schedule, self.job)
    }
}

/// Cron-driven job submission.
///
/// Triggers are declared up front; [`TriggerService::spawn`] then moves them
/// into a single background loop that sleeps until the earliest upcoming
/// fire time, submits the bound job, and recomputes that trigger's next fire
/// time.
pub struct TriggerService {
    pipeline: Arc<Pipeline>,
    queue_length: usize,
    triggers: Vec<TriggerHandle>,
}

impl TriggerService {
    pub fn new(pipeline: Arc<Pipeline>, queue_length: usize) -> Self {
        Self {
            pipeline,
            queue_length,
            triggers: Vec::new(),
        }
    }

    /// Bind `cron` to the configured job `job`.
    ///
    /// Fails with `UnknownJob` if the pipeline has no such job and
    /// `InvalidCron` if the expression does not parse.
    pub fn declare(&mut self, name: &str, cron: &str, job: &str) -> Result<TriggerHandle> {
        if self.triggers.iter().any(|t| t.name == name) {
            return Err(PipelineError::ConfigError(format!(
                "trigger '{name}' is declared twice"
            )));
        }
        if self.pipeline.job_definition(job).is_none() {
            return Err(PipelineError::UnknownJob(job.to_string()));
        }
        let schedule = CronSchedule::parse(cron)?;

        let handle = TriggerHandle {
            name: name.to_string(),
            job: job.to_string(),
            schedule,
        };
        info!(trigger = %name, cron = %handle.schedule, job = %job, "declared trigger");
        self.triggers.push(handle.clone());
        Ok(handle)
    }

    pub fn triggers(&self) -> &[TriggerHandle] {
        &self.triggers
    }

    /// Start the background loop.
    pub fn spawn(self) -> TriggerServiceHandle {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (summaries, _) = broadcast::channel(SUMMARY_CHANNEL_CAPACITY);
        let (stop, _) = stop_channel();

        let service_loop = ServiceLoop {
            pipeline: self.pipeline,
            triggers: self.triggers.clone(),
            queue: FiringQueue::new(self.queue_length),
            upcoming: BTreeSet::new(),
            commands_rx,
            finished_tx,
            finished_rx,
            summaries: summaries.clone(),
            stop,
            running: JoinSet::new(),
        };

        let join = tokio::spawn(service_loop.run().instrument(info_span!("trigger_service")));

        TriggerServiceHandle {
            commands_tx,
            summaries,
            triggers: self.triggers,
            join,
        }
    }
}

enum Command {
    FireNow {
        trigger: String,
        reply: oneshot::Sender<Result<FireDecision>>,
    },
    Shutdown,
}

/// Control handle for a running [`TriggerService`].
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) also
/// shuts the loop down, but nothing waits for in-flight runs.
pub struct TriggerServiceHandle {
    commands_tx: mpsc::Sender<Command>,
    summaries: broadcast::Sender<RunSummary>,
    triggers: Vec<TriggerHandle>,
    join: JoinHandle<()>,
}

impl TriggerServiceHandle {
    /// Fire a declared trigger immediately, subject to the same overlap
    /// rules as a scheduled firing.
    pub async fn fire_now(&self, trigger: &str) -> Result<FireDecision> {
        let (reply, rx) = oneshot::channel();
        let command = Command::FireNow {
            trigger: trigger.to_string(),
            reply,
        };
        self.commands_tx
            .send(command)
            .await
            .map_err(|_| PipelineError::Other(anyhow::anyhow!("trigger service is not running")))?;
        rx.await
            .map_err(|_| PipelineError::Other(anyhow::anyhow!("trigger service dropped the request")))?
    }

    /// Receive every run summary produced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunSummary> {
        self.summaries.subscribe()
    }

    pub fn triggers(&self) -> &[TriggerHandle] {
        &self.triggers
    }

    /// The next fire time of every trigger after `after`, earliest first.
    pub fn next_fire_times(&self, after: DateTime<Utc>) -> Vec<(String, DateTime<Utc>)> {
        let mut times: Vec<(String, DateTime<Utc>)> = self
            .triggers
            .iter()
            .filter_map(|t| t.next_fire_after(after).map(|at| (t.name.clone(), at)))
            .collect();
        times.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        times
    }

    /// Stop firing, stop dispatching new units, and wait for in-flight runs
    /// to finish.
    pub async fn shutdown(self) {
        if self.commands_tx.send(Command::Shutdown).await.is_err() {
            debug!("trigger service already stopped");
        }
        if let Err(err) = self.join.await {
            error!(error = %err, "trigger service task failed");
        }
    }
}

struct ServiceLoop {
    pipeline: Arc<Pipeline>,
    triggers: Vec<TriggerHandle>,
    queue: FiringQueue,
    /// (fire time, trigger index), earliest first.
    upcoming: BTreeSet<(DateTime<Utc>, usize)>,
    commands_rx: mpsc::Receiver<Command>,
    finished_tx: mpsc::UnboundedSender<String>,
    finished_rx: mpsc::UnboundedReceiver<String>,
    summaries: broadcast::Sender<RunSummary>,
    stop: StopHandle,
    running: JoinSet<()>,
}

impl ServiceLoop {
    async fn run(mut self) {
        let now = Utc::now();
        for (idx, trigger) in self.triggers.iter().enumerate() {
            match trigger.next_fire_after(now) {
                Some(at) => {
                    info!(trigger = %trigger.name, next = %at, "trigger scheduled");
                    self.upcoming.insert((at, idx));
                }
                None => warn!(trigger = %trigger.name, "cron expression never fires"),
            }
        }
        info!(triggers = self.triggers.len(), "trigger service started");

        loop {
            let next = self.upcoming.first().copied();
            let wait = next.map_or(IDLE_WAKEUP, |(at, _)| until(at));

            tokio::select! {
                _ = tokio::time::sleep(wait), if next.is_some() => {
                    if let Some((at, idx)) = next {
                        self.on_due(at, idx);
                    }
                }
                Some(job) = self.finished_rx.recv() => {
                    self.on_run_finished(&job);
                }
                command = self.commands_rx.recv() => match command {
                    Some(Command::FireNow { trigger, reply }) => {
                        let decision = self.fire_by_name(&trigger);
                        let _ = reply.send(decision);
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        self.drain().await;
    }

    /// A scheduled fire time was reached.
    fn on_due(&mut self, at: DateTime<Utc>, idx: usize) {
        // Firings are due only once the wall clock has passed them.
        if Utc::now() < at {
            return;
        }
        self.upcoming.remove(&(at, idx));

        let trigger = self.triggers[idx].clone();
        if let Some(next) = trigger.next_fire_after(at) {
            debug!(trigger = %trigger.name, next = %next, "rescheduled trigger");
            self.upcoming.insert((next, idx));
        }

        info!(trigger = %trigger.name, scheduled_for = %at, "trigger fired");
        self.fire(&trigger);
    }

    fn fire_by_name(&mut self, name: &str) -> Result<FireDecision> {
        let trigger = self
            .triggers
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| PipelineError::ConfigError(format!("unknown trigger '{name}'")))?;
        info!(trigger = %trigger.name, "trigger fired manually");
        Ok(self.fire(&trigger))
    }

    fn fire(&mut self, trigger: &TriggerHandle) -> FireDecision {
        let decision = self.queue.on_fire(&trigger.job);
        match decision {
            FireDecision::Start => self.start_run(trigger.job.clone()),
            FireDecision::Deferred => {
                info!(trigger = %trigger.name, job = %trigger.job, "job already running; firing deferred");
            }
            FireDecision::Dropped => {
                warn!(trigger = %trigger.name, job = %trigger.job, "job already running with a full queue; firing dropped");
            }
        }
        decision
    }

    fn on_run_finished(&mut self, job: &str) {
        // Reap completed tasks so the set does not grow without bound.
        while self.running.try_join_next().is_some() {}

        if self.queue.on_finished(job) {
            self.start_run(job.to_string());
        }
    }

    fn start_run(&mut self, job: String) {
        let pipeline = Arc::clone(&self.pipeline);
        let stop = self.stop.signal();
        let finished_tx = self.finished_tx.clone();
        let summaries = self.summaries.clone();
        let span = info_span!("trigger_run", job = %job);

        self.running.spawn(
            async move {
                match pipeline.run_job_with_stop(&job, stop).await {
                    Ok(summary) => {
                        // No subscribers is fine.
                        let _ = summaries.send(summary);
                    }
                    Err(err) => error!(error = %err, "triggered job could not be run"),
                }
                let _ = finished_tx.send(job);
            }
            .instrument(span),
        );
    }

    /// Stop dispatching and wait for every in-flight run.
    async fn drain(&mut self) {
        let dropped = self.queue.clear_deferred();
        self.stop.stop();
        info!(
            in_flight = self.running.len(),
            dropped_deferred = dropped,
            "trigger service shutting down; waiting for in-flight runs"
        );

        while let Some(res) = self.running.join_next().await {
            if let Err(err) = res {
                error!(error = %err, "triggered run task failed");
            }
        }
        info!("trigger service stopped");
    }
}

fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
