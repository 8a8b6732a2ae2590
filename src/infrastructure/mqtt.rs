// MQTT adapter - inbound reading listener and outbound command publisher
use crate::application::command_relay::MessagePublisher;
use crate::application::pipeline::{IngestOutcome, PipelineCoordinator};
use crate::infrastructure::config::MqttSettings;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::time::{sleep, Duration};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 32;

pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(settings.keep_alive());
    if let Some(username) = &settings.username {
        options.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
    }
    options
}

/// Create the broker connection. Nothing touches the network until the
/// listener starts polling.
pub fn connect(settings: &MqttSettings) -> (MqttPublisher, MqttListener) {
    let (client, eventloop) = AsyncClient::new(mqtt_options(settings), REQUEST_CAPACITY);
    let publisher = MqttPublisher {
        client: client.clone(),
    };
    let listener = MqttListener {
        client,
        eventloop,
        inbound_topic: settings.inbound_topic.clone(),
    };
    (publisher, listener)
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl MessagePublisher for MqttPublisher {
    /// Never waits on the request queue; a full queue (broker down) is an error.
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .with_context(|| format!("failed to queue publish on {}", topic))
    }
}

pub struct MqttListener {
    client: AsyncClient,
    eventloop: EventLoop,
    inbound_topic: String,
}

impl MqttListener {
    /// Poll the broker forever, feeding every inbound publish to the pipeline
    /// in arrival order. Connection errors are logged and retried.
    pub async fn run(mut self, pipeline: PipelineCoordinator) -> anyhow::Result<()> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                    if connack.code != ConnectReturnCode::Success {
                        tracing::error!(code = ?connack.code, "MQTT broker refused connection");
                        continue;
                    }
                    // subscriptions do not survive a clean-session reconnect; awaiting
                    // here would stop the event loop from draining the request queue
                    match self
                        .client
                        .try_subscribe(self.inbound_topic.clone(), QoS::AtLeastOnce)
                    {
                        Ok(()) => tracing::info!(topic = %self.inbound_topic, "subscribed to readings"),
                        Err(err) => {
                            tracing::warn!(error = %err, topic = %self.inbound_topic, "failed to subscribe")
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    match pipeline.ingest(&publish.payload) {
                        IngestOutcome::Rejected(_) => {}
                        IngestOutcome::Buffered { len } => {
                            tracing::trace!(topic = %publish.topic, len, "reading buffered")
                        }
                        IngestOutcome::Flushed(_) => {
                            tracing::trace!(topic = %publish.topic, "reading completed a batch")
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}
