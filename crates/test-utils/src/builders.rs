#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use pipedag::config::{ConfigFile, JobConfig, RawConfigFile, ScheduleConfig, UnitConfig};
use pipedag::errors::Result;
use pipedag::types::Group;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_unit(mut self, name: &str, unit: UnitConfig) -> Self {
        self.config.unit.insert(name.to_string(), unit);
        self
    }

    pub fn with_job(mut self, name: &str, selection: &[&str]) -> Self {
        self.config.job.insert(
            name.to_string(),
            JobConfig {
                selection: selection.iter().map(|s| s.to_string()).collect(),
                description: None,
            },
        );
        self
    }

    pub fn with_schedule(mut self, name: &str, cron: &str, job: &str) -> Self {
        self.config.schedule.insert(
            name.to_string(),
            ScheduleConfig {
                cron: cron.to_string(),
                job: job.to_string(),
                enabled: true,
            },
        );
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.config.project_root = root.into();
        self
    }

    pub fn with_max_parallelism(mut self, n: usize) -> Self {
        self.config.config.max_parallelism = Some(n);
        self
    }

    pub fn with_queue_length(mut self, n: usize) -> Self {
        self.config.config.queue_length = n;
        self
    }

    pub fn with_default_timeout(mut self, timeout: &str) -> Self {
        self.config.config.default_timeout = Some(timeout.to_string());
        self
    }

    /// The unvalidated config.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `UnitConfig`.
pub struct UnitConfigBuilder {
    unit: UnitConfig,
}

impl UnitConfigBuilder {
    pub fn new(group: Group, cmd: &str) -> Self {
        Self {
            unit: UnitConfig {
                group,
                cmd: cmd.to_string(),
                after: vec![],
                timeout: None,
                setup: vec![],
                check: None,
                check_key: None,
                env: BTreeMap::new(),
                count_files: BTreeMap::new(),
                file_exists: BTreeMap::new(),
                description: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.unit.after.push(dep.to_string());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.unit.timeout = Some(timeout.to_string());
        self
    }

    pub fn setup(mut self, cmd: &str) -> Self {
        self.unit.setup.push(cmd.to_string());
        self
    }

    pub fn check(mut self, cmd: &str) -> Self {
        self.unit.check = Some(cmd.to_string());
        self
    }

    pub fn check_key(mut self, key: &str) -> Self {
        self.unit.check_key = Some(key.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.unit.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn count_files(mut self, key: &str, pattern: &str) -> Self {
        self.unit
            .count_files
            .insert(key.to_string(), pattern.to_string());
        self
    }

    pub fn file_exists(mut self, key: &str, path: &str) -> Self {
        self.unit
            .file_exists
            .insert(key.to_string(), path.to_string());
        self
    }

    pub fn build(self) -> UnitConfig {
        self.unit
    }
}
