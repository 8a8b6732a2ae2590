// Command relay - forwards operator commands to the device over the broker
use crate::domain::command::{Command, CommandError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Outbound side of the messaging channel.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct CommandRelay {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
}

impl CommandRelay {
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// Publish the command as `"<name>,<state>"`. Nothing is awaited from the
    /// device; a failed publish is only logged.
    pub async fn relay(&self, command: &Command) {
        let payload = command.encode();
        match self.publisher.publish(&self.topic, Bytes::from(payload.clone())).await {
            Ok(()) => tracing::info!(topic = %self.topic, command = %payload, "relayed command"),
            Err(err) => {
                tracing::error!(error = %err, topic = %self.topic, command = %payload, "failed to relay command")
            }
        }
    }

    /// Parse an observer-submitted command and relay it. Malformed input is
    /// logged and nothing is published.
    pub async fn relay_text(&self, raw: &str) -> Result<Command, CommandError> {
        let command = raw.parse::<Command>().map_err(|err| {
            tracing::warn!(error = %err, raw = %raw, "ignoring malformed command");
            err
        })?;
        self.relay(&command).await;
        Ok(command)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Publisher that keeps everything it was asked to send.
    #[derive(Default)]
    pub struct RecordingPublisher {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingPublisher {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagePublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("broker unreachable");
            }
            let text = String::from_utf8(payload.to_vec())?;
            self.sent.lock().unwrap().push((topic.to_string(), text));
            Ok(())
        }
    }
}
