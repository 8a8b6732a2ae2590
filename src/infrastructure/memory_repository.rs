// In-memory repository implementation, used for local runs and tests
use crate::application::sample_repository::{PersistenceResult, SampleRepository};
use crate::domain::sample::{AveragedSample, NewSample};
use crate::domain::time_range::TimeRange;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: Vec<AveragedSample>,
}

#[derive(Clone)]
pub struct InMemoryRepository {
    table: Arc<RwLock<Table>>,
    clock: Clock,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::default())),
            clock,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleRepository for InMemoryRepository {
    async fn ensure_schema(&self) -> PersistenceResult<()> {
        Ok(())
    }

    async fn insert_average(&self, sample: NewSample) -> PersistenceResult<AveragedSample> {
        let timestamp = (self.clock)();
        let mut table = self.table.write().await;
        table.next_id += 1;

        // mirror the NUMERIC(10,2) columns
        let stored = NewSample::new(sample.current, sample.voltage);
        let row = AveragedSample::new(table.next_id, timestamp, stored.current, stored.voltage);
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn fetch_all(&self) -> PersistenceResult<Vec<AveragedSample>> {
        let mut rows = self.table.read().await.rows.clone();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn fetch_by_id(&self, id: i64) -> PersistenceResult<Option<AveragedSample>> {
        let table = self.table.read().await;
        Ok(table.rows.iter().find(|r| r.id == id).cloned())
    }

    async fn fetch_in_range(&self, range: TimeRange) -> PersistenceResult<Vec<AveragedSample>> {
        let now = (self.clock)();
        let table = self.table.read().await;
        let mut rows: Vec<AveragedSample> = table
            .rows
            .iter()
            .filter(|r| range.contains(now, r.timestamp))
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.timestamp, r.id));
        Ok(rows)
    }

    async fn delete_by_id(&self, id: i64) -> PersistenceResult<Option<AveragedSample>> {
        let mut table = self.table.write().await;
        let position = table.rows.iter().position(|r| r.id == id);
        Ok(position.map(|idx| table.rows.remove(idx)))
    }
}
