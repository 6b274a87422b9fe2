// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::Selection;
use crate::errors::{PipelineError, Result};
use crate::exec::command::{DEFAULT_CHECK_KEY, EXIT_CODE_KEY};
use crate::exec::probe::compile_glob;
use crate::trigger::CronSchedule;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PipelineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let order = validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw, order))
    }
}

/// Run every check and return the units in topological order.
fn validate_raw_config(cfg: &RawConfigFile) -> Result<Vec<String>> {
    ensure_has_units(cfg)?;
    validate_global_config(cfg)?;
    validate_units(cfg)?;
    validate_unit_dependencies(cfg)?;
    let order = validate_dag(cfg)?;
    validate_jobs(cfg)?;
    validate_schedules(cfg)?;
    Ok(order)
}

fn ensure_has_units(cfg: &RawConfigFile) -> Result<()> {
    if cfg.unit.is_empty() {
        return Err(PipelineError::ConfigError(
            "config must contain at least one [unit.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.queue_length == 0 {
        return Err(PipelineError::ConfigError(
            "[config].queue_length must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.max_parallelism == Some(0) {
        return Err(PipelineError::ConfigError(
            "[config].max_parallelism must be >= 1 (got 0)".to_string(),
        ));
    }

    cfg.config.default_timeout()?;
    Ok(())
}

fn validate_units(cfg: &RawConfigFile) -> Result<()> {
    for (name, unit) in cfg.unit.iter() {
        if name.trim().is_empty() || name.contains([':', ',']) {
            return Err(PipelineError::ConfigError(format!(
                "invalid unit name '{name}': must be non-empty and contain no ':' or ','"
            )));
        }

        if unit.cmd.trim().is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "unit '{name}' has an empty `cmd`"
            )));
        }

        if let Some(timeout) = &unit.timeout {
            parse_duration(timeout).map_err(|e| {
                PipelineError::InvalidDuration(format!("unit '{name}' timeout: {e}"))
            })?;
        }

        for (key, pattern) in unit.count_files.iter() {
            compile_glob(pattern).map_err(|e| {
                PipelineError::ConfigError(format!("unit '{name}' count_files.{key}: {e:#}"))
            })?;
        }

        let check_key = unit.check_key.as_deref().unwrap_or(DEFAULT_CHECK_KEY);
        if check_key.trim().is_empty() || check_key == EXIT_CODE_KEY {
            return Err(PipelineError::ConfigError(format!(
                "unit '{name}' has an invalid `check_key` '{check_key}'"
            )));
        }
        if unit.check_key.is_some() && unit.check.is_none() {
            return Err(PipelineError::ConfigError(format!(
                "unit '{name}' sets `check_key` without a `check` command"
            )));
        }

        for key in unit.file_exists.keys().chain(unit.count_files.keys()) {
            if key == EXIT_CODE_KEY || key == check_key {
                return Err(PipelineError::ConfigError(format!(
                    "unit '{name}' probe key '{key}' is reserved"
                )));
            }
        }
    }
    Ok(())
}

fn validate_unit_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, unit) in cfg.unit.iter() {
        for dep in unit.after.iter() {
            if dep == name {
                return Err(PipelineError::SelfDependency(name.clone()));
            }
            if !cfg.unit.contains_key(dep) {
                return Err(PipelineError::UnknownDependency {
                    unit: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<Vec<String>> {
    // Edge direction: dep -> unit. For
    //   [unit.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.unit.keys() {
        graph.add_node(name.as_str());
    }

    for (name, unit) in cfg.unit.iter() {
        for dep in unit.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(PipelineError::DagCycle(format!(
            "cycle detected in unit DAG involving unit '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_jobs(cfg: &RawConfigFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        if job.selection.is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "job '{name}' has an empty `selection`"
            )));
        }

        for expr in job.selection.iter() {
            let selection: Selection = expr.parse()?;
            if let Selection::Unit(unit) = &selection {
                if !cfg.unit.contains_key(unit) {
                    return Err(PipelineError::UnknownUnit(format!(
                        "{unit} (in job '{name}')"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_schedules(cfg: &RawConfigFile) -> Result<()> {
    for (name, schedule) in cfg.schedule.iter() {
        if !cfg.job.contains_key(&schedule.job) {
            return Err(PipelineError::UnknownJob(format!(
                "{} (in schedule '{name}')",
                schedule.job
            )));
        }
        CronSchedule::parse(&schedule.cron)?;
    }
    Ok(())
}
