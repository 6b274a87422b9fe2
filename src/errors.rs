// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only setup-time and plumbing failures are errors. A unit that fails at run
//! time is not an error: it is recorded as a
//! [`FailureReason`](crate::engine::FailureReason) inside its run result.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unit already registered: {0}")]
    DuplicateUnit(String),

    #[error("Unit '{unit}' has unknown dependency '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Unit '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Cycle detected in unit DAG: {0}")]
    DagCycle(String),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Invalid selection expression: {0}")]
    InvalidSelection(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether this error describes a bad unit, job or trigger definition.
    ///
    /// Such errors are raised at setup time and must prevent any run.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PipelineError::ConfigError(_)
                | PipelineError::DuplicateUnit(_)
                | PipelineError::UnknownDependency { .. }
                | PipelineError::SelfDependency(_)
                | PipelineError::DagCycle(_)
                | PipelineError::UnknownGroup(_)
                | PipelineError::UnknownUnit(_)
                | PipelineError::UnknownJob(_)
                | PipelineError::InvalidSelection(_)
                | PipelineError::InvalidCron { .. }
                | PipelineError::InvalidDuration(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;
