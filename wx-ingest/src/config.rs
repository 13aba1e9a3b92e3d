use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Environment variable naming the TOML config file to load.
pub const CONFIG_ENV: &str = "WX_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub sdr: SdrConfig,
    pub influx: InfluxConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Radio bridge stream settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SdrConfig {
    pub stream_url: String,
    #[serde(default = "default_stream_retries")]
    pub max_retries: u32,
    #[serde(default = "default_stream_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl SdrConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Time-series database connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub host: String,
    #[serde(default)]
    pub token: String,
    pub database: String,
}

/// Flat-file archive locations.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub spill_path: Option<PathBuf>,
}

impl StoreConfig {
    /// Spill log location, next to the archive unless set explicitly.
    pub fn spill_path(&self) -> PathBuf {
        match &self.spill_path {
            Some(path) => path.clone(),
            None => {
                let mut path = self.path.clone().into_os_string();
                path.push(".spill");
                PathBuf::from(path)
            }
        }
    }
}

/// Delivery settings for the time-series sink.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_queued_batches: usize,
}

impl SinkConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_retries: 3,
            retry_backoff_ms: 250,
            max_queued_batches: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl AppConfig {
    /// Loads configuration from the file named by `WX_CONFIG`, falling back
    /// to `wx-config.toml` in the working directory.
    ///
    /// The InfluxDB settings can be overridden through `INFLUX_HOST`,
    /// `INFLUX_TOKEN` and `INFLUX_DATABASE`, which is how the deployment
    /// hands the service its credentials.
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var(CONFIG_ENV).unwrap_or_else(|_| "wx-config.toml".to_string());
        let contents =
            fs::read_to_string(&path).with_context(|| format!("failed to read config file {path}"))?;
        let mut config: AppConfig =
            toml::from_str(&contents).with_context(|| format!("failed to parse {path}"))?;

        if let Ok(host) = env::var("INFLUX_HOST") {
            config.influx.host = host;
        }
        if let Ok(token) = env::var("INFLUX_TOKEN") {
            config.influx.token = token;
        }
        if let Ok(database) = env::var("INFLUX_DATABASE") {
            config.influx.database = database;
        }
        Ok(config)
    }
}

fn default_stream_retries() -> u32 {
    5
}

fn default_stream_backoff_ms() -> u64 {
    1_000
}
