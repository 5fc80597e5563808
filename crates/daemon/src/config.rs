//! Configuration management for the HomeLink daemon.
//!
//! TOML-based configuration with defaults, environment variable overrides
//! and validation. The default configuration path is
//! `~/.config/homelink/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default cloud relay endpoint.
pub const DEFAULT_CLOUD_HOST: &str = "cloud.homed.dev";

/// Default cloud relay port.
pub const DEFAULT_CLOUD_PORT: u16 = 8042;

/// Topic categories whose latest value is retained for replay on subscribe.
pub const DEFAULT_RETAINED_CATEGORIES: &[&str] = &["device", "expose", "service", "status"];

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("cloud host must not be empty")]
    EmptyCloudHost,

    #[error("mqtt host must not be empty")]
    EmptyMqttHost,

    #[error("retained_categories entries must be single path segments, got {0:?}")]
    InvalidRetainedCategory(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Main configuration structure for the HomeLink daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Cloud relay connection settings.
    pub cloud: CloudConfig,

    /// Local MQTT bus settings.
    pub mqtt: MqttConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Cloud relay connection settings.
///
/// `unique_id` and `token` identify this installation to the relay. If
/// either is absent the cloud bridge is disabled for the process lifetime:
/// this is reported once at startup and never retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloudConfig {
    /// Unique device identifier issued by the cloud.
    pub unique_id: Option<String>,

    /// Access token paired with the unique identifier.
    pub token: Option<String>,

    /// Relay host name.
    pub host: String,

    /// Relay TCP port.
    pub port: u16,

    /// First path segments of topics whose latest value is cached for
    /// replay on subscribe.
    pub retained_categories: Vec<String>,
}

/// Local MQTT bus settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name.
    pub host: String,

    /// Broker TCP port.
    pub port: u16,

    /// Optional broker username.
    pub username: Option<String>,

    /// Optional broker password.
    pub password: Option<String>,

    /// Topic prefix all bus traffic lives under.
    pub prefix: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            unique_id: None,
            token: None,
            host: DEFAULT_CLOUD_HOST.to_string(),
            port: DEFAULT_CLOUD_PORT,
            retained_categories: DEFAULT_RETAINED_CATEGORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            prefix: "homed".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("homelink")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - HOMELINK_UNIQUE_ID: Override the device identifier
    /// - HOMELINK_TOKEN: Override the access token
    /// - HOMELINK_CLOUD_HOST: Override the relay host
    /// - HOMELINK_LOG_LEVEL: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("HOMELINK_UNIQUE_ID") {
            if !id.is_empty() {
                self.cloud.unique_id = Some(id);
            }
        }

        if let Ok(token) = std::env::var("HOMELINK_TOKEN") {
            if !token.is_empty() {
                self.cloud.token = Some(token);
            }
        }

        if let Ok(host) = std::env::var("HOMELINK_CLOUD_HOST") {
            if !host.is_empty() {
                tracing::info!("Overriding cloud host from environment: {}", host);
                self.cloud.host = host;
            }
        }

        if let Ok(level) = std::env::var("HOMELINK_LOG_LEVEL") {
            if !level.is_empty() {
                self.daemon.log_level = level;
            }
        }
    }

    /// Whether both identity values required by the relay are present.
    ///
    /// Empty strings count as absent, matching the relay's behavior of
    /// rejecting blank credentials.
    pub fn has_cloud_identity(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.cloud.unique_id) && present(&self.cloud.token)
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cloud.host.is_empty() {
            return Err(ConfigError::EmptyCloudHost);
        }

        if self.mqtt.host.is_empty() {
            return Err(ConfigError::EmptyMqttHost);
        }

        for category in &self.cloud.retained_categories {
            if category.is_empty() || category.contains('/') || category.contains('#') {
                return Err(ConfigError::InvalidRetainedCategory(category.clone()));
            }
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", e))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}
