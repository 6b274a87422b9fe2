// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a configuration file without semantic validation.
/// Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_str(&contents)
}

/// Deserialize configuration from TOML text.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file and validate it.
///
/// - Reads TOML and applies serde defaults.
/// - Checks durations, unit references, the DAG, job selections and
///   schedules.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let config = ConfigFile::try_from(raw_config)?;
    debug!(
        path = %path.display(),
        units = config.unit.len(),
        jobs = config.job.len(),
        schedules = config.schedule.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// `Pipedag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipedag.toml")
}
