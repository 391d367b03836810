//! Configuration for the WalletLink engine.
//!
//! Configuration is loaded from a TOML file (default: `walletlink.toml`).
//! Every field has a default, so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use walletlink_core::ReconnectPolicy;

/// Root configuration for the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Wallet user id, registered with the relay as the push webhook id.
    #[serde(default)]
    pub user_id: Option<String>,
    /// URL the relay calls to wake this wallet (push notifications).
    #[serde(default)]
    pub notification_url: Option<String>,
    /// How long to wait for the relay to answer a frame, in milliseconds
    /// (default: 10000).
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Reconnection configuration.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Outstanding request configuration.
    #[serde(default)]
    pub requests: RequestsConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry in milliseconds (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the exponential delay in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Maximum random jitter in milliseconds (default: 1000).
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    /// Consecutive failures before giving up (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Outstanding request configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestsConfig {
    /// Seconds a responded request is remembered (default: 3600 = 1 hour).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Maximum number of tracked requests (default: 10000).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Events buffered per stream subscriber before it lags (default: 256).
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

// Default value functions
fn default_ack_timeout_ms() -> u64 {
    10_000
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_jitter_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retention_secs() -> u64 {
    3600 // 1 hour
}

fn default_capacity() -> usize {
    10_000
}

fn default_stream_buffer() -> usize {
    256
}

fn default_database_path() -> PathBuf {
    PathBuf::from("walletlink.db")
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            capacity: default_capacity(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            notification_url: None,
            ack_timeout_ms: default_ack_timeout_ms(),
            reconnect: ReconnectConfig::default(),
            requests: RequestsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Configuration for a wallet user with a push notification endpoint.
    pub fn new(user_id: impl Into<String>, notification_url: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            notification_url: Some(notification_url.into()),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.notification_url {
            url::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("notification_url: {}", e)))?;
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.base_delay_ms exceeds reconnect.max_delay_ms".into(),
            ));
        }
        if self.requests.stream_buffer == 0 {
            return Err(ConfigError::Invalid(
                "requests.stream_buffer must be positive".into(),
            ));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ack_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Backoff policy for relay reconnection.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_jitter: Duration::from_millis(self.reconnect.max_jitter_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// How long to wait for the relay to answer a frame.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// How long responded requests are remembered.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.requests.retention_secs)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
