use crate::domain::connection::RetryPolicy;
use crate::domain::history::{HistoryWindow, SensorKind};
use serde::Deserialize;
use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("buffer.capacity must be greater than zero")]
    ZeroCapacity,

    #[error("history.hours_back must be greater than zero")]
    ZeroHoursBack,

    #[error("render.tick_ms must be greater than zero")]
    ZeroTick,

    #[error("retry.initial_backoff_ms ({initial}) exceeds retry.max_backoff_ms ({max})")]
    BackoffOrder { initial: u64, max: u64 },

    #[error("broker.topic must not be empty")]
    EmptyTopic,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    pub broker: BrokerSettings,
    pub history: HistorySettings,
    #[serde(default)]
    pub buffer: BufferSettings,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub topic: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistorySettings {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_sensor")]
    pub sensor: SensorKind,
    #[serde(default = "default_hours_back")]
    pub hours_back: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BufferSettings {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderSettings {
    pub tick_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "sensor-collector".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_sensor() -> SensorKind {
    SensorKind::Ldr
}

fn default_hours_back() -> u32 {
    48
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_retries: None,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl BufferSettings {
    pub fn capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.capacity).ok_or(ConfigError::ZeroCapacity)
    }
}

impl HistorySettings {
    pub fn window(&self) -> Result<HistoryWindow, ConfigError> {
        NonZeroU32::new(self.hours_back)
            .map(HistoryWindow::last_hours)
            .ok_or(ConfigError::ZeroHoursBack)
    }
}

impl RenderSettings {
    pub fn tick(&self) -> Result<Duration, ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        Ok(Duration::from_millis(self.tick_ms))
    }
}

impl RetrySettings {
    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::BackoffOrder {
                initial: self.initial_backoff_ms,
                max: self.max_backoff_ms,
            });
        }
        Ok(RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_retries: self.max_retries,
        })
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        self.buffer.capacity()?;
        self.history.window()?;
        self.render.tick()?;
        self.retry.policy()?;
        Ok(())
    }
}

/// Load `config/collector.*`, then apply `COLLECTOR__SECTION__KEY` overrides.
pub fn load_collector_config() -> anyhow::Result<CollectorConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/collector").required(false))
        .add_source(
            config::Environment::with_prefix("COLLECTOR")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let collector: CollectorConfig = settings.try_deserialize()?;
    collector.validate()?;
    Ok(collector)
}
