// Pipeline coordinator - decode, broadcast, aggregate and persist inbound readings
use crate::application::broadcaster::{
    reply_channel, AckStatus, CommandAck, LiveBroadcaster, ObserverEvent, RAW_DATA_CHANNEL,
};
use crate::application::command_relay::CommandRelay;
use crate::application::history_service::{HistoryService, QueryError};
use crate::application::sample_repository::{with_deadline, SampleRepository};
use crate::domain::buffer::{AggregationBuffer, BufferResult};
use crate::domain::reading::{decode_bytes, DecodeError};
use crate::domain::sample::NewSample;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Rejected(DecodeError),
    Buffered { len: usize },
    Flushed(NewSample),
}

/// Single owner of the aggregation buffer. Observer requests go through the
/// same handle but never take the buffer lock.
#[derive(Clone)]
pub struct PipelineCoordinator {
    buffer: Arc<Mutex<AggregationBuffer>>,
    broadcaster: LiveBroadcaster,
    writer: mpsc::Sender<NewSample>,
    history: HistoryService,
    relay: CommandRelay,
}

impl PipelineCoordinator {
    pub fn new(
        buffer: AggregationBuffer,
        broadcaster: LiveBroadcaster,
        writer: mpsc::Sender<NewSample>,
        history: HistoryService,
        relay: CommandRelay,
    ) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(buffer)),
            broadcaster,
            writer,
            history,
            relay,
        }
    }

    pub fn broadcaster(&self) -> &LiveBroadcaster {
        &self.broadcaster
    }

    /// Handle one raw message from the inbound topic.
    pub fn ingest(&self, payload: &[u8]) -> IngestOutcome {
        let reading = match decode_bytes(payload) {
            Ok(reading) => reading,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    payload = %String::from_utf8_lossy(payload),
                    "dropping undecodable reading"
                );
                return IngestOutcome::Rejected(err);
            }
        };

        let receivers = self
            .broadcaster
            .publish(RAW_DATA_CHANNEL, ObserverEvent::RawData(reading));
        tracing::debug!(
            current = reading.current,
            voltage = reading.voltage,
            receivers,
            "broadcast raw reading"
        );

        // lock is released before anything touches storage
        let result = {
            let mut buffer = self
                .buffer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            buffer.offer(reading)
        };

        let batch = match result {
            BufferResult::Accumulating(len) => return IngestOutcome::Buffered { len },
            BufferResult::Ready(batch) => batch,
        };

        let Some(sample) = NewSample::average(&batch) else {
            return IngestOutcome::Buffered { len: 0 };
        };

        tracing::info!(
            readings = batch.len(),
            current = sample.current,
            voltage = sample.voltage,
            "batch complete, queueing averaged sample"
        );

        if let Err(err) = self.writer.try_send(sample) {
            tracing::error!(
                error = %err,
                current = sample.current,
                voltage = sample.voltage,
                "averaged sample lost: write queue unavailable"
            );
        }

        IngestOutcome::Flushed(sample)
    }

    /// Run a range query for one observer and reply on its private channel.
    pub async fn query_range(&self, connection_id: &str, start: &Value, end: &Value) -> ObserverEvent {
        let event = match self.history.query_range(start, end).await {
            Ok(rows) => ObserverEvent::RangeData(rows),
            Err(QueryError::Invalid(err)) => ObserverEvent::RangeError {
                message: err.to_string(),
            },
            Err(QueryError::Storage(_)) => ObserverEvent::RangeError {
                message: "historical data is temporarily unavailable".to_string(),
            },
        };

        self.broadcaster
            .publish(&reply_channel(connection_id), event.clone());
        event
    }

    /// Forward an observer command to the device and acknowledge receipt.
    pub async fn submit_command(&self, connection_id: &str, raw: &str) -> CommandAck {
        let ack = match self.relay.relay_text(raw).await {
            Ok(command) => CommandAck {
                status: AckStatus::Received,
                command: command.encode(),
                message: None,
            },
            Err(err) => CommandAck {
                status: AckStatus::Rejected,
                command: raw.to_string(),
                message: Some(err.to_string()),
            },
        };

        self.broadcaster.publish(
            &reply_channel(connection_id),
            ObserverEvent::CommandAck(ack.clone()),
        );
        ack
    }
}

/// Drain averaged samples into storage. Exits once every sender is dropped and
/// the queue is empty. Failed writes are logged and not retried.
pub fn spawn_writer(
    repository: Arc<dyn SampleRepository>,
    mut rx: mpsc::Receiver<NewSample>,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(sample) = rx.recv().await {
            match with_deadline(timeout, repository.insert_average(sample)).await {
                Ok(stored) => tracing::info!(
                    id = stored.id,
                    timestamp = %stored.timestamp,
                    current = stored.current,
                    voltage = stored.voltage,
                    "persisted averaged sample"
                ),
                Err(err) => tracing::error!(
                    error = %err,
                    current = sample.current,
                    voltage = sample.voltage,
                    "averaged sample lost: insert failed"
                ),
            }
        }
        tracing::debug!("sample writer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::command_relay::testing::RecordingPublisher;
    use crate::application::sample_repository::{PersistenceError, PersistenceResult};
    use crate::domain::reading::SensorReading;
    use crate::domain::sample::AveragedSample;
    use crate::domain::time_range::TimeRange;
    use crate::infrastructure::memory_repository::InMemoryRepository;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    const TIMEOUT: Duration = Duration::from_secs(1);

    struct Harness {
        pipeline: PipelineCoordinator,
        writer: JoinHandle<()>,
        repo: Arc<InMemoryRepository>,
        publisher: Arc<RecordingPublisher>,
    }

    fn harness(batch_size: usize) -> Harness {
        let repo = Arc::new(InMemoryRepository::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let (tx, rx) = mpsc::channel(8);
        let writer = spawn_writer(repo.clone(), rx, TIMEOUT);

        let pipeline = PipelineCoordinator::new(
            AggregationBuffer::new(batch_size).unwrap(),
            LiveBroadcaster::new(),
            tx,
            HistoryService::new(repo.clone(), TIMEOUT),
            CommandRelay::new(publisher.clone(), "sensor/commands"),
        );

        Harness {
            pipeline,
            writer,
            repo,
            publisher,
        }
    }

    #[tokio::test]
    async fn test_five_readings_persist_one_average() {
        let Harness {
            pipeline,
            writer,
            repo,
            ..
        } = harness(5);
        let mut raw = pipeline.broadcaster().subscribe(RAW_DATA_CHANNEL);

        let payloads = ["1.0,100.0", "2.0,100.0", "3.0,100.0", "4.0,100.0", "5.0,100.0"];
        let mut outcomes = Vec::new();
        for payload in payloads {
            outcomes.push(pipeline.ingest(payload.as_bytes()));
        }

        assert_eq!(outcomes[3], IngestOutcome::Buffered { len: 4 });
        assert_eq!(outcomes[4], IngestOutcome::Flushed(NewSample::new(3.0, 100.0)));

        for i in 1..=5 {
            assert_eq!(
                raw.try_recv().unwrap(),
                ObserverEvent::RawData(SensorReading::new(i as f64, 100.0))
            );
        }
        assert!(matches!(raw.try_recv(), Err(TryRecvError::Empty)));

        drop(pipeline);
        writer.await.unwrap();

        let rows = repo.fetch_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].current, 3.0);
        assert_eq!(rows[0].voltage, 100.0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let Harness {
            pipeline,
            writer,
            repo,
            ..
        } = harness(2);
        let mut raw = pipeline.broadcaster().subscribe(RAW_DATA_CHANNEL);

        assert!(matches!(
            pipeline.ingest(b"abc,100"),
            IngestOutcome::Rejected(DecodeError::NotNumeric { .. })
        ));
        assert!(matches!(raw.try_recv(), Err(TryRecvError::Empty)));

        // buffer untouched: the next good reading is the first of its batch
        assert_eq!(pipeline.ingest(b"1.0,230.0"), IngestOutcome::Buffered { len: 1 });

        drop(pipeline);
        writer.await.unwrap();
        assert_eq!(repo.len().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_one_persists_every_reading() {
        let Harness {
            pipeline,
            writer,
            repo,
            ..
        } = harness(1);

        pipeline.ingest(b"1.234,230.0");
        pipeline.ingest(b"2.0,231.456");

        drop(pipeline);
        writer.await.unwrap();

        let rows = repo.fetch_all().await.unwrap();
        let values: Vec<(f64, f64)> = rows.iter().map(|r| (r.current, r.voltage)).collect();
        assert_eq!(values, vec![(1.23, 230.0), (2.0, 231.46)]);
    }

    #[tokio::test]
    async fn test_command_is_relayed_and_acknowledged() {
        let Harness {
            pipeline, publisher, ..
        } = harness(5);
        let mut replies = pipeline.broadcaster().subscribe(&reply_channel("conn-1"));

        let ack = pipeline.submit_command("conn-1", "fan,1").await;

        assert_eq!(ack.status, AckStatus::Received);
        assert_eq!(
            publisher.sent(),
            vec![("sensor/commands".to_string(), "fan,1".to_string())]
        );
        assert_eq!(replies.try_recv().unwrap(), ObserverEvent::CommandAck(ack));
    }

    #[tokio::test]
    async fn test_malformed_command_is_rejected() {
        let Harness {
            pipeline, publisher, ..
        } = harness(5);

        let ack = pipeline.submit_command("conn-1", "fan").await;

        assert_eq!(ack.status, AckStatus::Rejected);
        assert!(ack.message.is_some());
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_range_query_replies_only_to_requester() {
        let Harness { pipeline, repo, .. } = harness(5);
        let stored = repo.insert_average(NewSample::new(1.5, 229.0)).await.unwrap();

        let mut asker = pipeline.broadcaster().subscribe(&reply_channel("asker"));
        let mut other = pipeline.broadcaster().subscribe(&reply_channel("other"));
        let mut raw = pipeline.broadcaster().subscribe(RAW_DATA_CHANNEL);

        let event = pipeline.query_range("asker", &json!(0), &json!(24)).await;

        assert_eq!(event, ObserverEvent::RangeData(vec![stored]));
        assert_eq!(asker.try_recv().unwrap(), event);
        assert!(matches!(other.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(raw.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_invalid_range_gets_explicit_error() {
        let Harness { pipeline, .. } = harness(5);

        let event = pipeline.query_range("asker", &json!("abc"), &json!(24)).await;
        assert!(matches!(event, ObserverEvent::RangeError { .. }));
    }

    struct DownRepository;

    #[async_trait]
    impl SampleRepository for DownRepository {
        async fn ensure_schema(&self) -> PersistenceResult<()> {
            Err(PersistenceError::Unavailable("down".into()))
        }
        async fn insert_average(&self, _sample: NewSample) -> PersistenceResult<AveragedSample> {
            Err(PersistenceError::Unavailable("down".into()))
        }
        async fn fetch_all(&self) -> PersistenceResult<Vec<AveragedSample>> {
            Err(PersistenceError::Unavailable("down".into()))
        }
        async fn fetch_by_id(&self, _id: i64) -> PersistenceResult<Option<AveragedSample>> {
            Err(PersistenceError::Unavailable("down".into()))
        }
        async fn fetch_in_range(&self, _range: TimeRange) -> PersistenceResult<Vec<AveragedSample>> {
            Err(PersistenceError::Unavailable("down".into()))
        }
        async fn delete_by_id(&self, _id: i64) -> PersistenceResult<Option<AveragedSample>> {
            Err(PersistenceError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_outage_does_not_stop_ingestion() {
        let repo: Arc<dyn SampleRepository> = Arc::new(DownRepository);
        let (tx, rx) = mpsc::channel(8);
        let writer = spawn_writer(repo.clone(), rx, TIMEOUT);
        let pipeline = PipelineCoordinator::new(
            AggregationBuffer::new(1).unwrap(),
            LiveBroadcaster::new(),
            tx,
            HistoryService::new(repo, TIMEOUT),
            CommandRelay::new(Arc::new(RecordingPublisher::default()), "sensor/commands"),
        );

        assert!(matches!(pipeline.ingest(b"1.0,2.0"), IngestOutcome::Flushed(_)));
        assert!(matches!(pipeline.ingest(b"3.0,4.0"), IngestOutcome::Flushed(_)));

        let event = pipeline.query_range("asker", &json!(0), &json!(1)).await;
        assert!(matches!(event, ObserverEvent::RangeError { .. }));

        drop(pipeline);
        writer.await.unwrap();
    }
}
