//! Cron normalization, validation and next-tick helpers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use cfwatch_core::TrackerError;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires `sec min hour day-of-month month day-of-week`;
/// stored schedules usually use the 5-field form without seconds.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse a 5- or 6-field expression. Failures are `Validation` errors.
pub fn parse_cron(expr: &str) -> Result<Schedule, TrackerError> {
    let normalized = normalize_cron(expr);
    if normalized.is_empty() {
        return Err(TrackerError::Validation("cron expression is empty".to_string()));
    }
    Schedule::from_str(&normalized)
        .map_err(|e| TrackerError::Validation(format!("invalid cron expression '{}': {e}", expr.trim())))
}

/// First tick strictly after `after`.
pub fn next_fire_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}
