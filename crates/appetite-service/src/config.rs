//! Configuration for appetited

use crate::error::{ServiceError, ServiceResult};
use appetite_core::{EngineConfig, StorageConfig};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,

    /// PostgreSQL connection URL, required for the postgres backend
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_pool_size")]
    pub max_connections: u32,

    /// JSON fixtures loaded into the in-memory collaborators at startup
    #[serde(default)]
    pub fixtures_path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: default_pool_size(),
            fixtures_path: None,
        }
    }
}

impl StorageSettings {
    pub fn storage_config(&self) -> ServiceResult<StorageConfig> {
        match self.backend {
            StorageBackend::Memory => Ok(StorageConfig::memory()),
            StorageBackend::Postgres => {
                let url = self.database_url.as_deref().ok_or_else(|| {
                    ServiceError::Config(
                        "storage.backend=postgres requires storage.database_url".to_string(),
                    )
                })?;
                Ok(StorageConfig::postgres(url, self.max_connections))
            }
        }
    }
}

/// Engine timeouts and detection behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_timeout_ms")]
    pub resolve_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub action_timeout_ms: u64,

    /// Append provisional observations for metrics recomputed during detection
    #[serde(default = "default_true")]
    pub record_observations: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            resolve_timeout_ms: default_timeout_ms(),
            action_timeout_ms: default_timeout_ms(),
            record_observations: true,
        }
    }
}

impl EngineSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            resolve_timeout: Duration::from_millis(self.resolve_timeout_ms.max(1)),
            action_timeout: Duration::from_millis(self.action_timeout_ms.max(1)),
            record_observations: self.record_observations,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run detection in the background
    #[serde(default)]
    pub enabled: bool,

    /// Detection interval in seconds
    #[serde(default = "default_detect_interval")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_detect_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8090))
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    5
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_detect_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Load configuration: defaults, then the optional file, then `APPETITE_*` variables.
    ///
    /// Nested keys use a double underscore, e.g. `APPETITE_SCHEDULER__ENABLED=true`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ServiceConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("APPETITE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
