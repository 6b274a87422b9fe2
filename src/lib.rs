// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod trigger;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::assemble::{config_root_dir, project_root, trigger_specs};
use crate::config::{build_pipeline, build_trigger_service, load_and_validate, ConfigFile};
use crate::engine::{stop_channel, Pipeline, RunSummary};
use crate::trigger::CronSchedule;
use crate::types::UnitStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - registry / pipeline assembly
/// - either a single job run (`--job`) or the schedule service
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let config_dir = config_root_dir(&config_path);

    let max_parallelism = args.max_parallelism.map(|n| n as usize);
    let pipeline = Arc::new(build_pipeline(&cfg, &config_dir, max_parallelism)?);

    if args.dry_run {
        print_dry_run(&cfg, &pipeline, &config_dir)?;
        return Ok(());
    }

    match args.job.as_deref() {
        Some(job) => run_once(&pipeline, job, args.json).await,
        None => run_schedules(&cfg, pipeline, args.json).await,
    }
}

/// Run one job to completion. A failed run is an error so the process exits
/// non-zero.
async fn run_once(pipeline: &Pipeline, name: &str, json: bool) -> Result<()> {
    let job = pipeline.resolve(name)?;
    let (stop, signal) = stop_channel();

    // Ctrl-C → stop dispatching, let in-flight units finish.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("Ctrl-C received; waiting for in-flight units");
        stop.stop();
    });

    let summary = pipeline.run_with_stop(&job, signal).await;
    print_summary(&summary, json)?;

    if !summary.is_success() {
        bail!(
            "job '{}' failed (units: {})",
            summary.job,
            summary.units_with_status(UnitStatus::Failed).join(", ")
        );
    }
    Ok(())
}

/// Run the configured schedules until Ctrl-C.
async fn run_schedules(cfg: &ConfigFile, pipeline: Arc<Pipeline>, json: bool) -> Result<()> {
    let service = build_trigger_service(cfg, pipeline)?;
    if service.triggers().is_empty() {
        bail!("no enabled schedules in config; use --job to run a job once");
    }

    let handle = service.spawn();
    for (trigger, at) in handle.next_fire_times(Utc::now()) {
        info!(trigger = %trigger, next = %at, "next firing");
    }

    let mut summaries = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match summaries.recv().await {
                Ok(summary) => {
                    if let Err(e) = print_summary(&summary, json) {
                        warn!(error = %e, "failed to print run summary");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "summary printer fell behind; some summaries were not printed");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received; shutting down");
    handle.shutdown().await;

    if let Err(e) = printer.await {
        warn!(error = %e, "summary printer task failed");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{}", summary.render());
    }
    Ok(())
}

/// Dry-run output: units in dispatch order, jobs and schedules.
fn print_dry_run(cfg: &ConfigFile, pipeline: &Pipeline, config_dir: &std::path::Path) -> Result<()> {
    println!("pipedag dry-run");
    println!(
        "  config.project_root = {}",
        project_root(cfg, config_dir).display()
    );
    println!("  config.max_parallelism = {}", pipeline.max_parallelism());
    println!("  config.queue_length = {}", cfg.config.queue_length);
    println!();

    println!("units ({}), in topological order:", pipeline.registry().len());
    for unit in pipeline.registry().all_units() {
        println!("  - {} [{}]", unit.name(), unit.group());
        println!("      timeout: {:?}", unit.timeout());
        if !unit.predecessors().is_empty() {
            println!("      after: {:?}", unit.predecessors());
        }
        if let Some(unit_cfg) = cfg.unit.get(unit.name()) {
            println!("      cmd: {}", unit_cfg.cmd);
            if !unit_cfg.setup.is_empty() {
                println!("      setup: {:?}", unit_cfg.setup);
            }
            if let Some(check) = &unit_cfg.check {
                println!("      check: {check}");
            }
        }
    }
    println!();

    println!("jobs:");
    for name in pipeline.job_names() {
        let job = pipeline.resolve(name)?;
        let units: Vec<&str> = job.units().collect();
        println!("  - {name}: {units:?}");
    }
    println!();

    println!("schedules:");
    let now = Utc::now();
    for spec in trigger_specs(cfg) {
        let next = CronSchedule::parse(&spec.cron)?
            .next_after(now)
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        println!(
            "  - {} ({}) -> {}{}; next: {}",
            spec.name,
            spec.cron,
            spec.job,
            if spec.enabled { "" } else { " [disabled]" },
            next
        );
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
