// Averaged sample domain models
use super::reading::SensorReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Round to the two decimal places the store keeps.
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Averaged values waiting to be persisted. Always rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NewSample {
    pub current: f64,
    pub voltage: f64,
}

impl NewSample {
    pub fn new(current: f64, voltage: f64) -> Self {
        Self {
            current: round_to_cents(current),
            voltage: round_to_cents(voltage),
        }
    }

    /// Arithmetic mean of a batch. Returns `None` for an empty batch.
    pub fn average(batch: &[SensorReading]) -> Option<Self> {
        if batch.is_empty() {
            return None;
        }

        let count = batch.len() as f64;
        let current = batch.iter().map(|r| r.current).sum::<f64>() / count;
        let voltage = batch.iter().map(|r| r.voltage).sum::<f64>() / count;

        Some(Self::new(current, voltage))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedSample {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub current: f64,
    pub voltage: f64,
}

impl AveragedSample {
    pub fn new(id: i64, timestamp: DateTime<Utc>, current: f64, voltage: f64) -> Self {
        Self {
            id,
            timestamp,
            current,
            voltage,
        }
    }

    /// Apparent power in watts, rounded like the stored fields.
    pub fn power(&self) -> f64 {
        round_to_cents(self.current * self.voltage)
    }
}

/// Mean current, voltage and power over a set of stored samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerSummary {
    pub current: f64,
    pub voltage: f64,
    pub power: f64,
}

impl PowerSummary {
    pub fn of(samples: &[AveragedSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len() as f64;
        Some(Self {
            current: round_to_cents(samples.iter().map(|s| s.current).sum::<f64>() / count),
            voltage: round_to_cents(samples.iter().map(|s| s.voltage).sum::<f64>() / count),
            power: round_to_cents(samples.iter().map(AveragedSample::power).sum::<f64>() / count),
        })
    }
}
