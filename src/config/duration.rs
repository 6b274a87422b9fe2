// src/config/duration.rs

use std::time::Duration;

use crate::errors::{PipelineError, Result};

/// Parse a duration string like `"250ms"`, `"30s"`, `"10m"`, `"2h"`.
///
/// Zero is rejected: every duration in the config is a timeout.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(PipelineError::InvalidDuration(
            "empty duration string".to_string(),
        ));
    }

    // Boundary between digits and suffix.
    let idx = s.chars().position(|c| !c.is_ascii_digit()).ok_or_else(|| {
        PipelineError::InvalidDuration(format!("'{s}' is missing a unit suffix (ms, s, m, h)"))
    })?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part.parse().map_err(|e| {
        PipelineError::InvalidDuration(format!("invalid number in '{s}': {e}"))
    })?;

    let duration = match unit_part.trim().to_lowercase().as_str() {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(60 * 60)),
        other => {
            return Err(PipelineError::InvalidDuration(format!(
                "unsupported unit '{other}' in '{s}'; expected ms, s, m or h"
            )));
        }
    };

    if duration.is_zero() {
        return Err(PipelineError::InvalidDuration(format!(
            "'{s}' must be greater than zero"
        )));
    }

    Ok(duration)
}
