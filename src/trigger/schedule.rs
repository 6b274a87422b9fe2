// src/trigger/schedule.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::errors::{PipelineError, Result};

/// Weekday names in crontab numbering: 0 and 7 are Sunday.
const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A parsed cron expression, evaluated in UTC.
///
/// Accepts the classic 5-field crontab form (`min hour dom month dow`) as
/// well as the 6/7-field forms with leading seconds (and trailing year).
///
/// A 5-field expression fires at second zero and numbers weekdays the
/// crontab way (0-7, Sunday = 0 or 7). In the 6/7-field forms the weekday
/// field is handed to the `cron` crate as is, where numbers run 1 (Sunday)
/// to 7 (Saturday); names (`MON-FRI`) mean the same in every form.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let weekday = crontab_weekdays(fields[4]).map_err(|reason| {
                    PipelineError::InvalidCron {
                        expression: expression.to_string(),
                        reason,
                    }
                })?;
                format!("0 {} {}", fields[..4].join(" "), weekday)
            }
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(PipelineError::InvalidCron {
                    expression: expression.to_string(),
                    reason: format!("expected 5, 6 or 7 fields, found {n}"),
                });
            }
        };

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| PipelineError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`, if the expression ever fires
    /// again.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// The next `n` firings after `after`.
    pub fn upcoming_after(&self, after: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(n).collect()
    }
}

/// Rewrite a crontab weekday field with weekday names.
///
/// Numeric items (`1`, `1-5`, `*/2`, `5-7`) are expanded into explicit name
/// lists; `*`, `?` and items that are already names pass through.
fn crontab_weekdays(field: &str) -> std::result::Result<String, String> {
    let mut out: Vec<String> = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid weekday step in '{item}'"))?;
                if step == 0 {
                    return Err(format!("weekday step must be positive in '{item}'"));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let bounds = match (range, step) {
            ("*" | "?", None) => {
                out.push(range.to_string());
                continue;
            }
            ("*", Some(_)) => (0, 6),
            _ if !range.bytes().all(|b| b.is_ascii_digit() || b == b'-') => {
                out.push(item.to_string());
                continue;
            }
            _ => {
                let (lo, hi) = match range.split_once('-') {
                    Some((lo, hi)) => (weekday_number(lo)?, weekday_number(hi)?),
                    None => {
                        let day = weekday_number(range)?;
                        // `a/n` runs from `a` to the end of the week.
                        (day, if step.is_some() { 6 } else { day })
                    }
                };
                if lo > hi {
                    return Err(format!("weekday range '{range}' runs backwards"));
                }
                (lo, hi)
            }
        };

        for day in (bounds.0..=bounds.1).step_by(step.unwrap_or(1)) {
            let name = WEEKDAYS[day].to_string();
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }

    Ok(out.join(","))
}

fn weekday_number(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n < WEEKDAYS.len() => Ok(n),
        _ => Err(format!("weekday '{s}' is outside 0-7")),
    }
}

impl FromStr for CronSchedule {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
