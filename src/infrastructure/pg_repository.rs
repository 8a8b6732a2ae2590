// PostgreSQL repository implementation
use crate::application::sample_repository::{PersistenceError, PersistenceResult, SampleRepository};
use crate::domain::sample::{AveragedSample, NewSample};
use crate::domain::time_range::TimeRange;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;

const SAMPLE_COLUMNS: &str =
    r#"id, "timestamp", "current"::float8 AS "current", voltage::float8 AS voltage"#;

#[derive(Debug, Clone)]
pub struct PgSampleRepository {
    pool: PgPool,
}

/// The pool connects lazily so the service can start while the database is down.
pub fn build_pool(database_url: &str, max_connections: u32, acquire_timeout: Duration) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_lazy(database_url)?;
    Ok(pool)
}

impl PgSampleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_error(err: sqlx::Error) -> PersistenceError {
    PersistenceError::Unavailable(err.to_string())
}

fn sample_from_row(row: &PgRow) -> PersistenceResult<AveragedSample> {
    let read = || -> Result<AveragedSample, sqlx::Error> {
        Ok(AveragedSample::new(
            row.try_get::<i64, _>("id")?,
            row.try_get::<DateTime<Utc>, _>("timestamp")?,
            row.try_get::<f64, _>("current")?,
            row.try_get::<f64, _>("voltage")?,
        ))
    };
    read().map_err(storage_error)
}

fn hours_to_seconds(hours: f64) -> f64 {
    hours * 3600.0
}

#[async_trait]
impl SampleRepository for PgSampleRepository {
    async fn ensure_schema(&self) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_samples (
                id bigserial primary key,
                "timestamp" timestamptz not null default now(),
                "current" numeric(10, 2) not null,
                voltage numeric(10, 2) not null
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS sensor_samples_timestamp_idx ON sensor_samples ("timestamp")"#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn insert_average(&self, sample: NewSample) -> PersistenceResult<AveragedSample> {
        let query = format!(
            r#"INSERT INTO sensor_samples ("current", voltage) VALUES ($1, $2) RETURNING {}"#,
            SAMPLE_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(sample.current)
            .bind(sample.voltage)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        sample_from_row(&row)
    }

    async fn fetch_all(&self) -> PersistenceResult<Vec<AveragedSample>> {
        let query = format!("SELECT {} FROM sensor_samples ORDER BY id ASC", SAMPLE_COLUMNS);
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter().map(sample_from_row).collect()
    }

    async fn fetch_by_id(&self, id: i64) -> PersistenceResult<Option<AveragedSample>> {
        let query = format!("SELECT {} FROM sensor_samples WHERE id = $1", SAMPLE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(sample_from_row).transpose()
    }

    async fn fetch_in_range(&self, range: TimeRange) -> PersistenceResult<Vec<AveragedSample>> {
        // bounds are bound as float8 parameters; nothing user-supplied is spliced into the SQL
        let query = format!(
            r#"
            SELECT {}
            FROM sensor_samples
            WHERE "timestamp" BETWEEN now() - make_interval(secs => $1)
                                  AND now() - make_interval(secs => $2)
            ORDER BY "timestamp" ASC, id ASC
            "#,
            SAMPLE_COLUMNS
        );

        tracing::debug!(
            start_offset_hours = range.start_offset_hours(),
            end_offset_hours = range.end_offset_hours(),
            "fetching samples in range"
        );

        let rows = sqlx::query(&query)
            .bind(hours_to_seconds(range.end_offset_hours()))
            .bind(hours_to_seconds(range.start_offset_hours()))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter().map(sample_from_row).collect()
    }

    async fn delete_by_id(&self, id: i64) -> PersistenceResult<Option<AveragedSample>> {
        let query = format!("DELETE FROM sensor_samples WHERE id = $1 RETURNING {}", SAMPLE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(sample_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hours_to_seconds() {
        assert_eq!(hours_to_seconds(24.0), 86_400.0);
        assert_eq!(hours_to_seconds(0.5), 1_800.0);
    }

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect() {
        let pool = build_pool("postgres://nobody@127.0.0.1:1/none", 1, Duration::from_millis(100));
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_database_maps_to_unavailable() {
        let pool = build_pool("postgres://nobody@127.0.0.1:1/none", 1, Duration::from_millis(200)).unwrap();
        let repo = PgSampleRepository::new(pool);

        let err = repo.fetch_all().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Unavailable(_)));
    }
}
