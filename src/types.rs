// src/types.rs

//! Small value types shared across the registry, scheduler and engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// Canonical unit name type used throughout the crate.
pub type UnitName = String;

/// Stage of the pipeline a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Extract,
    Load,
    Transform,
    Enrich,
}

impl Group {
    pub const ALL: [Group; 4] = [Group::Extract, Group::Load, Group::Transform, Group::Enrich];

    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Extract => "extract",
            Group::Load => "load",
            Group::Transform => "transform",
            Group::Enrich => "enrich",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Group {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "extract" => Ok(Group::Extract),
            "load" => Ok(Group::Load),
            "transform" => Ok(Group::Transform),
            "enrich" => Ok(Group::Enrich),
            _ => Err(PipelineError::UnknownGroup(s.to_string())),
        }
    }
}

/// Per-unit status as reported in a run result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl UnitStatus {
    /// `true` for the three states a finished run may contain.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitStatus::Succeeded | UnitStatus::Failed | UnitStatus::Skipped
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Succeeded => "succeeded",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// Overall status of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded => f.write_str("succeeded"),
            RunStatus::Failed => f.write_str("failed"),
        }
    }
}

/// One value in a unit's metadata map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl MetadataValue {
    /// Interpret a raw string as the narrowest matching value.
    ///
    /// `"42"` becomes `Int`, `"0.5"` becomes `Float`, `"true"`/`"false"`
    /// become `Bool`, everything else is `Text`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(i) = raw.parse::<i64>() {
            return MetadataValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return MetadataValue::Float(f);
            }
        }
        match raw {
            "true" => MetadataValue::Bool(true),
            "false" => MetadataValue::Bool(false),
            _ => MetadataValue::Text(raw.to_string()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

/// Structured output of a unit's action.
pub type Metadata = BTreeMap<String, MetadataValue>;
