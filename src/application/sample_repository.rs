// Repository trait for averaged sample persistence
use crate::domain::sample::{AveragedSample, NewSample};
use crate::domain::time_range::TimeRange;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[async_trait]
pub trait SampleRepository: Send + Sync {
    /// Create the backing table if it does not exist yet. Safe to call repeatedly.
    async fn ensure_schema(&self) -> PersistenceResult<()>;

    /// Store an averaged sample; the store assigns id and timestamp.
    async fn insert_average(&self, sample: NewSample) -> PersistenceResult<AveragedSample>;

    /// All samples in insertion order
    async fn fetch_all(&self) -> PersistenceResult<Vec<AveragedSample>>;

    async fn fetch_by_id(&self, id: i64) -> PersistenceResult<Option<AveragedSample>>;

    /// Samples inside the (inclusive) window, oldest first
    async fn fetch_in_range(&self, range: TimeRange) -> PersistenceResult<Vec<AveragedSample>>;

    /// Remove a sample, returning the row that was deleted
    async fn delete_by_id(&self, id: i64) -> PersistenceResult<Option<AveragedSample>>;
}

/// Run a storage future under a deadline, mapping expiry to `PersistenceError::Timeout`.
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> PersistenceResult<T>
where
    F: std::future::Future<Output = PersistenceResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PersistenceError::Timeout(limit)),
    }
}
