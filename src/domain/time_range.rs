// Historical query window, expressed as hour offsets back from "now"
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

/// Offsets beyond this are rejected so the window arithmetic never overflows.
pub const MAX_OFFSET_HOURS: f64 = 1_000_000.0;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{0} must be a number")]
    NotNumeric(&'static str),
    #[error("{0} must be between 0 (now) and 1000000 hours back; future offsets are not accepted")]
    OutOfRange(&'static str),
    #[error("startOffsetHours ({start}) must not exceed endOffsetHours ({end})")]
    Inverted { start: f64, end: f64 },
}

/// Window `[now - end_offset_hours, now - start_offset_hours]`, closed on both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    start_offset_hours: f64,
    end_offset_hours: f64,
}

impl TimeRange {
    pub fn new(start_offset_hours: f64, end_offset_hours: f64) -> Result<Self, ValidationError> {
        let start = check_bound("startOffsetHours", start_offset_hours)?;
        let end = check_bound("endOffsetHours", end_offset_hours)?;

        if start > end {
            return Err(ValidationError::Inverted { start, end });
        }

        Ok(Self {
            start_offset_hours: start,
            end_offset_hours: end,
        })
    }

    /// Build a range from observer-supplied JSON. Numbers and numeric strings
    /// are accepted, anything else is a validation error.
    pub fn from_untrusted(start: &Value, end: &Value) -> Result<Self, ValidationError> {
        let start = numeric_bound("startOffsetHours", start)?;
        let end = numeric_bound("endOffsetHours", end)?;
        Self::new(start, end)
    }

    pub fn start_offset_hours(&self) -> f64 {
        self.start_offset_hours
    }

    pub fn end_offset_hours(&self) -> f64 {
        self.end_offset_hours
    }

    /// Oldest and newest instants covered by this range relative to `now`.
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            now - hours_to_duration(self.end_offset_hours),
            now - hours_to_duration(self.start_offset_hours),
        )
    }

    pub fn contains(&self, now: DateTime<Utc>, timestamp: DateTime<Utc>) -> bool {
        let (from, to) = self.window(now);
        timestamp >= from && timestamp <= to
    }
}

fn hours_to_duration(hours: f64) -> Duration {
    Duration::microseconds((hours * 3_600_000_000.0).round() as i64)
}

fn check_bound(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotNumeric(field));
    }
    if !(0.0..=MAX_OFFSET_HOURS).contains(&value) {
        return Err(ValidationError::OutOfRange(field));
    }
    Ok(value)
}

fn numeric_bound(field: &'static str, value: &Value) -> Result<f64, ValidationError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or(ValidationError::NotNumeric(field)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::NotNumeric(field)),
        _ => Err(ValidationError::NotNumeric(field)),
    }
}
