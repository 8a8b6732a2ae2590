// Live broadcaster - named fan-out channels for connected observers
use crate::domain::reading::SensorReading;
use crate::domain::sample::AveragedSample;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

pub const RAW_DATA_CHANNEL: &str = "raw-data";

const CHANNEL_CAPACITY: usize = 256;

/// Private reply channel for a single observer connection (query results, acks).
pub fn reply_channel(connection_id: &str) -> String {
    format!("reply:{}", connection_id)
}

/// Everything the server pushes to an observer, tagged as `{"event", "data"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ObserverEvent {
    Connected { connection_id: String },
    RawData(SensorReading),
    RangeData(Vec<AveragedSample>),
    RangeError { message: String },
    CommandAck(CommandAck),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandAck {
    pub status: AckStatus,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Received,
    Rejected,
}

/// Fire-and-forget publisher. Subscribers that fall behind lose the oldest
/// messages instead of slowing the sender down.
#[derive(Clone, Default)]
pub struct LiveBroadcaster {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<ObserverEvent>>>>,
}

impl LiveBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ObserverEvent> {
        let mut channels = self.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to everyone currently listening on `channel`. Returns how many
    /// receivers got the message; zero when nobody is subscribed.
    pub fn publish(&self, channel: &str, event: ObserverEvent) -> usize {
        let channels = self.read();
        match channels.get(channel) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop a channel, e.g. a private reply channel once its connection ends.
    pub fn close(&self, channel: &str) {
        if self.write().remove(channel).is_some() {
            tracing::debug!(channel, "closed broadcast channel");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, broadcast::Sender<ObserverEvent>>> {
        self.channels.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, broadcast::Sender<ObserverEvent>>> {
        self.channels.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
