// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{future::IntoFuture, net::SocketAddr, sync::Arc};
use axum::{routing::get, Router};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::application::broadcaster::LiveBroadcaster;
use crate::application::command_relay::CommandRelay;
use crate::application::history_service::HistoryService;
use crate::application::pipeline::{spawn_writer, PipelineCoordinator};
use crate::application::sample_repository::{with_deadline, SampleRepository};
use crate::domain::buffer::AggregationBuffer;
use crate::infrastructure::config::{load_config, AppConfig, StorageBackend};
use crate::infrastructure::memory_repository::InMemoryRepository;
use crate::infrastructure::mqtt;
use crate::infrastructure::pg_repository::{build_pool, PgSampleRepository};
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    delete_sample, get_sample, health_check, list_samples, range_summary, samples_in_range,
};
use crate::presentation::observer::observer_socket;

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,power_telemetry=info,tower_http=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

fn build_repository(config: &AppConfig) -> anyhow::Result<Arc<dyn SampleRepository>> {
    match config.database.backend {
        StorageBackend::Postgres => {
            let pool = build_pool(
                &config.database.url,
                config.database.max_connections,
                config.database.timeout(),
            )?;
            Ok(Arc::new(PgSampleRepository::new(pool)))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; samples are lost on restart");
            Ok(Arc::new(InMemoryRepository::new()))
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/samples", get(list_samples))
        .route("/samples/range", get(samples_in_range))
        .route("/samples/summary", get(range_summary))
        .route("/samples/:id", get(get_sample).delete(delete_sample))
        .route("/ws", get(observer_socket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing()?;

    // Load configuration
    let config = load_config()?;

    // Create repository (infrastructure layer)
    let repository = build_repository(&config)?;
    let timeout = config.database.timeout();
    if let Err(err) = with_deadline(timeout, repository.ensure_schema()).await {
        tracing::error!(error = %err, "could not ensure sample table; continuing");
    }

    // Messaging channel: inbound readings and outbound commands share one connection
    let (publisher, listener) = mqtt::connect(&config.mqtt);

    // Create services (application layer)
    let (write_tx, write_rx) = mpsc::channel(config.aggregation.write_queue);
    let writer_handle = spawn_writer(repository.clone(), write_rx, timeout);

    let history = HistoryService::new(repository.clone(), timeout);
    let relay = CommandRelay::new(Arc::new(publisher), config.mqtt.command_topic.clone());
    let pipeline = PipelineCoordinator::new(
        AggregationBuffer::new(config.aggregation.batch_size)?,
        LiveBroadcaster::new(),
        write_tx,
        history.clone(),
        relay,
    );

    let state = Arc::new(AppState {
        history,
        pipeline: pipeline.clone(),
    });

    // Build router (presentation layer)
    let router = router(state);

    let addr: SocketAddr = config.server.bind.parse()?;
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        batch_size = config.aggregation.batch_size,
        topic = %config.mqtt.inbound_topic,
        "starting power-telemetry service"
    );

    let mut mqtt_handle = tokio::spawn(listener.run(pipeline));
    let server = axum::serve(tcp, router).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    });

    tokio::select! {
        res = server.into_future() => {
            if let Err(err) = res { tracing::error!(error = %err, "HTTP server failed"); }
        }
        res = &mut mqtt_handle => {
            match res {
                Ok(Err(err)) => tracing::error!(error = %err, "MQTT listener exited"),
                Err(err) => tracing::error!(error = %err, "MQTT task failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    // The server and listener own the remaining coordinator handles; once they
    // are gone the writer drains its queue and stops.
    mqtt_handle.abort();
    let _ = mqtt_handle.await;
    if tokio::time::timeout(timeout, writer_handle).await.is_err() {
        tracing::warn!("sample writer did not drain before shutdown");
    }

    Ok(())
}
