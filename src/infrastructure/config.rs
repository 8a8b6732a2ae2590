use crate::domain::buffer::DEFAULT_BATCH_SIZE;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub mqtt: MqttSettings,
    pub database: DatabaseSettings,
    pub aggregation: AggregationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub inbound_topic: String,
    pub command_topic: String,
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl MqttSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(5))
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
    pub timeout_ms: u64,
}

impl DatabaseSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationSettings {
    pub batch_size: usize,
    pub write_queue: usize,
}

/// Defaults, then `config/telemetry.*` if present, then `TELEMETRY__*` env vars.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/telemetry").required(false));
    load_from(builder)
}

fn load_from(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> anyhow::Result<AppConfig> {
    let settings = with_defaults(builder)?
        .add_source(
            config::Environment::with_prefix("TELEMETRY")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> anyhow::Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(builder
        .set_default("server.bind", "0.0.0.0:8080")?
        .set_default("mqtt.host", "localhost")?
        .set_default("mqtt.port", 1883)?
        .set_default("mqtt.client_id", "power-telemetry")?
        .set_default("mqtt.inbound_topic", "sensor/readings")?
        .set_default("mqtt.command_topic", "sensor/commands")?
        .set_default("mqtt.keep_alive_secs", 30)?
        .set_default("database.backend", "postgres")?
        .set_default("database.url", "postgres://localhost/telemetry")?
        .set_default("database.max_connections", 5)?
        .set_default("database.timeout_ms", 5000)?
        .set_default("aggregation.batch_size", DEFAULT_BATCH_SIZE as i64)?
        .set_default("aggregation.write_queue", 64)?)
}

impl AppConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.aggregation.batch_size == 0 {
            anyhow::bail!("aggregation.batch_size must be at least 1");
        }
        if self.aggregation.write_queue == 0 {
            anyhow::bail!("aggregation.write_queue must be at least 1");
        }
        if self.database.timeout_ms == 0 {
            anyhow::bail!("database.timeout_ms must be greater than 0");
        }
        if self.mqtt.inbound_topic.trim().is_empty() || self.mqtt.command_topic.trim().is_empty() {
            anyhow::bail!("mqtt topics must not be empty");
        }
        Ok(())
    }
}
