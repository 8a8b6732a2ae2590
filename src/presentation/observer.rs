// WebSocket observer sessions - live readings, range queries and commands
use crate::application::broadcaster::{reply_channel, ObserverEvent, RAW_DATA_CHANNEL};
use crate::application::pipeline::PipelineCoordinator;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::Stream;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// Messages an observer may send, as `{"event": ..., "data": ...}`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ObserverRequest {
    RangeQuery(RangeRequest),
    Command(String),
}

/// Bounds stay untyped until the range is validated.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RangeRequest {
    #[serde(default)]
    pub start_offset_hours: Value,
    #[serde(default)]
    pub end_offset_hours: Value,
}

pub async fn observer_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let pipeline = state.pipeline.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, pipeline))
}

async fn handle_socket(socket: WebSocket, pipeline: PipelineCoordinator) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let private = reply_channel(&connection_id);
    let broadcaster = pipeline.broadcaster().clone();

    let raw = broadcaster.subscribe(RAW_DATA_CHANNEL);
    let replies = broadcaster.subscribe(&private);
    tracing::info!(connection = %connection_id, "observer connected");

    let (mut sender, mut receiver) = socket.split();

    let greeting = ObserverEvent::Connected {
        connection_id: connection_id.clone(),
    };
    let outbound_id = connection_id.clone();
    let mut outbound = tokio::spawn(async move {
        let events = futures::stream::once(async move { greeting }).chain(event_stream(raw, replies));
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode observer event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                tracing::debug!(connection = %outbound_id, "observer went away");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut outbound => break,
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_request(&pipeline, &connection_id, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(connection = %connection_id, error = %err, "observer socket error");
                        break;
                    }
                }
            }
        }
    }

    outbound.abort();
    broadcaster.close(&private);
    tracing::info!(connection = %connection_id, "observer disconnected");
}

async fn handle_request(pipeline: &PipelineCoordinator, connection_id: &str, text: &str) {
    match serde_json::from_str::<ObserverRequest>(text) {
        Ok(ObserverRequest::RangeQuery(range)) => {
            pipeline
                .query_range(connection_id, &range.start_offset_hours, &range.end_offset_hours)
                .await;
        }
        Ok(ObserverRequest::Command(raw)) => {
            pipeline.submit_command(connection_id, &raw).await;
        }
        Err(err) => {
            tracing::warn!(connection = %connection_id, error = %err, "ignoring unrecognised observer message");
        }
    }
}

/// Merge the shared raw-data feed with the connection's private replies.
/// Messages missed while lagging are skipped, not replayed.
fn event_stream(
    mut raw: broadcast::Receiver<ObserverEvent>,
    mut replies: broadcast::Receiver<ObserverEvent>,
) -> impl Stream<Item = ObserverEvent> {
    async_stream::stream! {
        loop {
            let received = tokio::select! {
                event = replies.recv() => event,
                event = raw.recv() => event,
            };
            match received {
                Ok(event) => yield event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "observer lagging; dropped events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broadcaster::LiveBroadcaster;
    use crate::domain::reading::SensorReading;
    use serde_json::json;

    #[test]
    fn test_parse_range_query() {
        let request: ObserverRequest = serde_json::from_value(json!({
            "event": "range_query",
            "data": {"startOffsetHours": 0, "endOffsetHours": "24"}
        }))
        .unwrap();

        assert_eq!(
            request,
            ObserverRequest::RangeQuery(RangeRequest {
                start_offset_hours: json!(0),
                end_offset_hours: json!("24"),
            })
        );
    }

    #[test]
    fn test_parse_command() {
        let request: ObserverRequest =
            serde_json::from_value(json!({"event": "command", "data": "fan,1"})).unwrap();
        assert_eq!(request, ObserverRequest::Command("fan,1".to_string()));
    }

    #[test]
    fn test_missing_bounds_parse_as_null() {
        let request: ObserverRequest =
            serde_json::from_value(json!({"event": "range_query", "data": {}})).unwrap();
        assert_eq!(
            request,
            ObserverRequest::RangeQuery(RangeRequest {
                start_offset_hours: Value::Null,
                end_offset_hours: Value::Null,
            })
        );
    }

    #[tokio::test]
    async fn test_event_stream_merges_raw_and_private_feeds() {
        let broadcaster = LiveBroadcaster::new();
        let raw = broadcaster.subscribe(RAW_DATA_CHANNEL);
        let replies = broadcaster.subscribe(&reply_channel("c1"));

        let reading = ObserverEvent::RawData(SensorReading::new(1.0, 2.0));
        let reply = ObserverEvent::RangeData(Vec::new());
        broadcaster.publish(RAW_DATA_CHANNEL, reading.clone());
        broadcaster.publish(&reply_channel("c1"), reply.clone());
        broadcaster.publish(&reply_channel("c2"), ObserverEvent::RangeData(Vec::new()));

        let events = event_stream(raw, replies);
        futures::pin_mut!(events);

        let mut received = vec![events.next().await.unwrap(), events.next().await.unwrap()];
        received.sort_by_key(|e| matches!(e, ObserverEvent::RangeData(_)));
        assert_eq!(received, vec![reading, reply]);

        // both senders gone: the stream ends once either side closes
        drop(broadcaster);
        assert_eq!(events.next().await, None);
    }
}
