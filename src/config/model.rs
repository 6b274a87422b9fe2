// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::duration::parse_duration;
use crate::dag::DEFAULT_UNIT_TIMEOUT;
use crate::errors::Result;
use crate::types::Group;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// max_parallelism = 4
///
/// [unit.data_loader]
/// group = "load"
/// cmd = "python src/load_raw_to_postgres.py"
/// after = ["telegram_scraper"]
/// timeout = "5m"
///
/// [job.extract_and_load]
/// selection = ["group:extract", "group:load"]
///
/// [schedule.nightly]
/// cron = "0 2 * * *"
/// job = "extract_and_load"
/// ```
///
/// Convert into a [`ConfigFile`] with `TryFrom`, which runs validation.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Keyed by unit name.
    #[serde(default)]
    pub unit: BTreeMap<String, UnitConfig>,

    /// Keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,

    /// Keyed by trigger name.
    #[serde(default)]
    pub schedule: BTreeMap<String, ScheduleConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Working directory for unit commands, relative to the config file.
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Upper bound on concurrently running units. `None` means one per CPU.
    #[serde(default)]
    pub max_parallelism: Option<usize>,

    /// How many overlapping firings of a job are remembered while it runs.
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,

    /// Timeout for units that do not declare one.
    #[serde(default)]
    pub default_timeout: Option<String>,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_queue_length() -> usize {
    1
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            max_parallelism: None,
            queue_length: default_queue_length(),
            default_timeout: None,
        }
    }
}

impl ConfigSection {
    pub fn default_timeout(&self) -> Result<Duration> {
        match &self.default_timeout {
            Some(s) => parse_duration(s),
            None => Ok(DEFAULT_UNIT_TIMEOUT),
        }
    }
}

/// `[unit.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitConfig {
    pub group: Group,

    /// Shell command that performs the unit's work.
    pub cmd: String,

    /// Units that must succeed before this one starts.
    #[serde(default)]
    pub after: Vec<String>,

    /// E.g. `"10m"`. Falls back to `[config].default_timeout`.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Commands run before `cmd`; each must succeed.
    #[serde(default)]
    pub setup: Vec<String>,

    /// Run after `cmd`; its exit status is recorded under `check_key` and
    /// never fails the unit.
    #[serde(default)]
    pub check: Option<String>,

    /// Metadata key for the `check` result. Defaults to `check_passed`.
    #[serde(default)]
    pub check_key: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Metadata key → glob, relative to the project root.
    #[serde(default)]
    pub count_files: BTreeMap<String, String>,

    /// Metadata key → path, relative to the project root.
    #[serde(default)]
    pub file_exists: BTreeMap<String, String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl UnitConfig {
    /// Effective timeout given the global default.
    pub fn effective_timeout(&self, default: Duration) -> Result<Duration> {
        match &self.timeout {
            Some(s) => parse_duration(s),
            None => Ok(default),
        }
    }
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Union of selection expressions (`all`, `group:<g>`, `unit:<u>`).
    pub selection: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// `[schedule.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub cron: String,

    /// Name of a `[job.<name>]`.
    pub job: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holding one means
/// the unit graph is acyclic, every reference resolves and every duration
/// and cron expression parses.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub unit: BTreeMap<String, UnitConfig>,
    pub job: BTreeMap<String, JobConfig>,
    pub schedule: BTreeMap<String, ScheduleConfig>,
    /// Unit names in a dependency-respecting order.
    topo_order: Vec<String>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile, topo_order: Vec<String>) -> Self {
        Self {
            config: raw.config,
            unit: raw.unit,
            job: raw.job,
            schedule: raw.schedule,
            topo_order,
        }
    }

    /// Unit names such that every unit comes after all of its `after`
    /// dependencies.
    pub fn topological_order(&self) -> &[String] {
        &self.topo_order
    }
}
