use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform minimum for background task intervals.
pub const MIN_BACKGROUND_INTERVAL_SECS: u64 = 15 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub identity: IdentityConfig,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub health_timeout_ms: u64,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Files at or above this size use the resumable protocol.
    pub chunk_threshold_bytes: u64,
    pub chunk_size_bytes: u64,
    /// Delay before each retry of a failed chunk. The length caps the retries.
    pub retry_delays_ms: Vec<u64>,
    pub wifi_only_large_files: bool,
    pub large_file_threshold_bytes: u64,
    /// Failed attempts after which the owning record shows `error`.
    pub max_attempts: i64,
    pub foreground_interval_secs: u64,
    pub background_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub temp_max_age_secs: u64,
    /// Keep records in the on-disk database. When false nothing survives the
    /// process and custody logging is refused.
    pub persistent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            identity: IdentityConfig::default(),
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            user_name: "Field Inspector".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout_secs: 60,
            health_timeout_ms: 5_000,
            auth_token: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_bytes: 10 * 1024 * 1024,
            chunk_size_bytes: 5 * 1024 * 1024,
            retry_delays_ms: vec![0, 1_000, 3_000, 5_000],
            wifi_only_large_files: true,
            large_file_threshold_bytes: 10 * 1024 * 1024,
            max_attempts: 5,
            foreground_interval_secs: 5 * 60,
            background_interval_secs: MIN_BACKGROUND_INTERVAL_SECS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_max_age_secs: 24 * 60 * 60,
            persistent: true,
        }
    }
}

impl SyncConfig {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
    }

    /// Background interval, never below the platform minimum.
    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_interval_secs.max(MIN_BACKGROUND_INTERVAL_SECS))
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.chunk_size_bytes == 0 {
            return Err(ConfigError::Invalid("sync.chunk_size_bytes must be positive".into()));
        }
        if self.sync.max_attempts < 1 {
            return Err(ConfigError::Invalid("sync.max_attempts must be at least 1".into()));
        }
        if self.server.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server.base_url is required".into()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("siteproof.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn default_config_path() -> PathBuf {
        default_data_dir().join("siteproof.toml")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("siteproof")
}
