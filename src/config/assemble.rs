// src/config/assemble.rs

//! Turning a validated [`ConfigFile`] into live objects: the unit registry,
//! the pipeline with its jobs, and the trigger service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::model::{ConfigFile, UnitConfig};
use crate::dag::{JobDefinition, Unit, UnitRegistry};
use crate::engine::Pipeline;
use crate::errors::{PipelineError, Result};
use crate::exec::{CommandAction, CommandSpec, Probe};
use crate::trigger::TriggerService;

/// A `[schedule.<name>]` entry ready to be declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub name: String,
    pub cron: String,
    pub job: String,
    pub enabled: bool,
}

/// Directory that relative paths in the config resolve against.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Working directory for unit commands.
pub fn project_root(cfg: &ConfigFile, config_dir: &Path) -> PathBuf {
    config_dir.join(&cfg.config.project_root)
}

/// Register every configured unit, dependencies first, each backed by a
/// [`CommandAction`].
pub fn build_registry(cfg: &ConfigFile, config_dir: &Path) -> Result<UnitRegistry> {
    let workdir = project_root(cfg, config_dir);
    let default_timeout = cfg.config.default_timeout()?;
    let mut registry = UnitRegistry::new();

    for name in cfg.topological_order() {
        let unit_cfg = cfg
            .unit
            .get(name)
            .ok_or_else(|| PipelineError::UnknownUnit(name.clone()))?;

        let spec = command_spec(unit_cfg, &workdir);
        let action = Arc::new(CommandAction::new(name.clone(), spec));

        let mut unit = Unit::new(name.clone(), unit_cfg.group, action)
            .with_timeout(unit_cfg.effective_timeout(default_timeout)?);
        for dep in unit_cfg.after.iter() {
            unit = unit.after(dep.clone());
        }
        if let Some(description) = &unit_cfg.description {
            unit = unit.with_description(description.clone());
        }

        debug!(unit = %name, group = %unit_cfg.group, timeout = ?unit.timeout(), "registering configured unit");
        registry.register(unit)?;
    }

    info!(units = registry.len(), "unit registry built");
    Ok(registry)
}

fn command_spec(unit: &UnitConfig, workdir: &Path) -> CommandSpec {
    let mut probes: Vec<Probe> = unit
        .count_files
        .iter()
        .map(|(key, pattern)| Probe::CountFiles {
            key: key.clone(),
            pattern: pattern.clone(),
        })
        .collect();
    probes.extend(unit.file_exists.iter().map(|(key, path)| Probe::FileExists {
        key: key.clone(),
        path: PathBuf::from(path),
    }));

    CommandSpec {
        cmd: unit.cmd.clone(),
        setup: unit.setup.clone(),
        check: unit.check.clone(),
        check_key: unit.check_key.clone(),
        workdir: workdir.to_path_buf(),
        env: unit.env.clone(),
        probes,
    }
}

pub fn job_definitions(cfg: &ConfigFile) -> Vec<JobDefinition> {
    cfg.job
        .iter()
        .map(|(name, job)| JobDefinition {
            name: name.clone(),
            selection: job.selection.clone(),
            description: job.description.clone(),
        })
        .collect()
}

pub fn trigger_specs(cfg: &ConfigFile) -> Vec<TriggerSpec> {
    cfg.schedule
        .iter()
        .map(|(name, s)| TriggerSpec {
            name: name.clone(),
            cron: s.cron.clone(),
            job: s.job.clone(),
            enabled: s.enabled,
        })
        .collect()
}

/// Build the pipeline: registry, job definitions and parallelism.
///
/// `max_parallelism` overrides `[config].max_parallelism` when given.
pub fn build_pipeline(
    cfg: &ConfigFile,
    config_dir: &Path,
    max_parallelism: Option<usize>,
) -> Result<Pipeline> {
    let registry = build_registry(cfg, config_dir)?;
    let mut pipeline = Pipeline::new(Arc::new(registry));

    if let Some(n) = max_parallelism.or(cfg.config.max_parallelism) {
        pipeline = pipeline.with_max_parallelism(n);
    }

    for def in job_definitions(cfg) {
        pipeline.define_job(def)?;
    }

    Ok(pipeline)
}

/// Declare every enabled schedule on a new trigger service.
pub fn build_trigger_service(cfg: &ConfigFile, pipeline: Arc<Pipeline>) -> Result<TriggerService> {
    let mut service = TriggerService::new(pipeline, cfg.config.queue_length);

    for spec in trigger_specs(cfg) {
        if !spec.enabled {
            info!(trigger = %spec.name, "schedule disabled; not declaring");
            continue;
        }
        service.declare(&spec.name, &spec.cron, &spec.job)?;
    }

    Ok(service)
}
