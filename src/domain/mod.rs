// Domain layer - Readings, batching policy and stored samples
pub mod buffer;
pub mod command;
pub mod reading;
pub mod sample;
pub mod time_range;
