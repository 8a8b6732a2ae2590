// Aggregation buffer - fixed-size batching of raw readings
use super::reading::SensorReading;
use thiserror::Error;

pub const DEFAULT_BATCH_SIZE: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("aggregation buffer capacity must be at least 1")]
pub struct ZeroCapacity;

#[derive(Debug, Clone, PartialEq)]
pub enum BufferResult {
    Accumulating(usize),
    Ready(Vec<SensorReading>),
}

#[derive(Debug)]
pub struct AggregationBuffer {
    samples: Vec<SensorReading>,
    capacity: usize,
}

impl AggregationBuffer {
    pub fn new(capacity: usize) -> Result<Self, ZeroCapacity> {
        if capacity == 0 {
            return Err(ZeroCapacity);
        }
        Ok(Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        })
    }

    /// Append a reading. Once the buffer holds `capacity` readings the whole
    /// batch is handed back and the buffer starts over empty.
    pub fn offer(&mut self, reading: SensorReading) -> BufferResult {
        self.samples.push(reading);

        if self.samples.len() >= self.capacity {
            let batch = std::mem::replace(&mut self.samples, Vec::with_capacity(self.capacity));
            BufferResult::Ready(batch)
        } else {
            BufferResult::Accumulating(self.samples.len())
        }
    }
}

impl Default for AggregationBuffer {
    fn default() -> Self {
        Self {
            samples: Vec::with_capacity(DEFAULT_BATCH_SIZE),
            capacity: DEFAULT_BATCH_SIZE,
        }
    }
}
