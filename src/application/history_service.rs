// History service - Use cases for reading and pruning persisted samples
use crate::application::sample_repository::{with_deadline, PersistenceError, SampleRepository};
use crate::domain::sample::AveragedSample;
use crate::domain::time_range::{TimeRange, ValidationError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid range: {0}")]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] PersistenceError),
}

#[derive(Clone)]
pub struct HistoryService {
    repository: Arc<dyn SampleRepository>,
    timeout: Duration,
}

impl HistoryService {
    pub fn new(repository: Arc<dyn SampleRepository>, timeout: Duration) -> Self {
        Self {
            repository,
            timeout,
        }
    }

    pub async fn list_samples(&self) -> Result<Vec<AveragedSample>, PersistenceError> {
        with_deadline(self.timeout, self.repository.fetch_all()).await
    }

    pub async fn sample(&self, id: i64) -> Result<Option<AveragedSample>, PersistenceError> {
        with_deadline(self.timeout, self.repository.fetch_by_id(id)).await
    }

    pub async fn delete_sample(&self, id: i64) -> Result<Option<AveragedSample>, PersistenceError> {
        let deleted = with_deadline(self.timeout, self.repository.delete_by_id(id)).await?;
        match &deleted {
            Some(sample) => tracing::info!(id, timestamp = %sample.timestamp, "deleted sample"),
            None => tracing::debug!(id, "delete requested for unknown sample"),
        }
        Ok(deleted)
    }

    pub async fn samples_in_range(&self, range: TimeRange) -> Result<Vec<AveragedSample>, PersistenceError> {
        with_deadline(self.timeout, self.repository.fetch_in_range(range)).await
    }

    /// Validate raw observer bounds, then run the range query.
    pub async fn query_range(&self, start: &Value, end: &Value) -> Result<Vec<AveragedSample>, QueryError> {
        let range = TimeRange::from_untrusted(start, end).map_err(|err| {
            tracing::warn!(error = %err, start = %start, end = %end, "rejected range query");
            err
        })?;

        self.samples_in_range(range).await.map_err(|err| {
            tracing::error!(
                error = %err,
                start_offset_hours = range.start_offset_hours(),
                end_offset_hours = range.end_offset_hours(),
                "range query failed"
            );
            QueryError::from(err)
        })
    }
}
