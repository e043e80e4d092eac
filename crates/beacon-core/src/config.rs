//! Application configuration management.
//!
//! Configuration is layered with the `config` crate:
//! 1. Built-in defaults (every field has one)
//! 2. An optional TOML file
//! 3. Environment variables `BEACON_<SECTION>__<KEY>`, e.g. `BEACON_BROKER__HOST`
//!
//! The top-level `env` key (`BEACON_ENV`) selects development or production
//! behaviour. Sections:
//! - `broker` - MQTT host, port, credentials and timeouts
//! - `scanner` - which devices to track and how long each scan window lasts
//! - `presence` - topic layout, RSSI hysteresis and expiry thresholds
//! - `logging` - log level, file rotation and directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beacon::PresencePolicy;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "BEACON";

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One of the configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment environment.
    pub env: RunEnvironment,
    /// MQTT broker connection.
    pub broker: BrokerConfig,
    /// BLE scanning.
    pub scanner: ScannerConfig,
    /// Presence model and topic layout.
    pub presence: PresenceConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Where the bridge is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunEnvironment {
    /// Pretty logs on stdout.
    #[default]
    Development,
    /// Structured log files plus plain stdout for the journal.
    Production,
}

impl RunEnvironment {
    /// Whether this is a production deployment.
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker hostname.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username, passed through to the broker unchanged.
    pub username: Option<String>,
    /// Password, passed through to the broker unchanged.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// MQTT client identifier.
    pub client_id: String,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// How long to collect retained messages at startup, in milliseconds.
    pub bootstrap_grace_ms: u64,
    /// Upper bound on a single publish, in milliseconds.
    pub publish_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "beacon-bridge".to_string(),
            keep_alive_secs: 30,
            bootstrap_grace_ms: 2000,
            publish_timeout_ms: 2000,
        }
    }
}

impl BrokerConfig {
    /// Grace period for the startup retained-message fetch.
    #[must_use]
    pub const fn bootstrap_grace(&self) -> Duration {
        Duration::from_millis(self.bootstrap_grace_ms)
    }

    /// Upper bound on a single publish.
    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// BLE scanning settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Only devices whose advertised name starts with this prefix are tracked.
    pub name_prefix: String,
    /// Length of each scan window in seconds. Expired beacons are swept after every window.
    pub scan_window_secs: u64,
    /// Bluetooth adapter name (e.g. `hci0`). The default adapter is used when unset.
    pub adapter: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "Vyro".to_string(),
            scan_window_secs: 6,
            adapter: None,
        }
    }
}

impl ScannerConfig {
    /// Length of each scan window.
    #[must_use]
    pub const fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_window_secs)
    }
}

/// Presence model settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// First topic level; messages go to `<topic_prefix>/<label>`.
    pub topic_prefix: String,
    /// Minimum RSSI change (dBm) that is worth republishing.
    pub rssi_hysteresis_dbm: u16,
    /// Silence after which a triggered beacon is considered gone.
    pub triggered_timeout_secs: u64,
    /// Silence after which any beacon is considered gone.
    pub idle_timeout_secs: u64,
    /// How long a beacon must have been known before the triggered timeout applies.
    pub triggered_grace_secs: u64,
    /// Publish an absence for every tracked beacon when the bridge shuts down.
    pub announce_absent_on_shutdown: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "presence".to_string(),
            rssi_hysteresis_dbm: 6,
            triggered_timeout_secs: 15,
            idle_timeout_secs: 120,
            triggered_grace_secs: 60,
            announce_absent_on_shutdown: false,
        }
    }
}

impl PresenceConfig {
    /// Expiry and hysteresis thresholds for beacon records.
    #[must_use]
    pub fn policy(&self) -> PresencePolicy {
        PresencePolicy {
            triggered_timeout: secs(self.triggered_timeout_secs),
            idle_timeout: secs(self.idle_timeout_secs),
            triggered_grace: secs(self.triggered_grace_secs),
            rssi_hysteresis: i32::from(self.rssi_hysteresis_dbm),
        }
    }
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// A new file every hour.
    Hourly,
    /// A new file every day.
    #[default]
    Daily,
    /// One file, never rotated.
    Never,
}

/// Log output settings.
///
/// `RUST_LOG`, when set, overrides `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `beacon_core=debug`.
    pub level: String,
    /// Log file rotation in production.
    pub rotation: LogRotation,
    /// Log file directory in production. Falls back to [`default_log_directory`].
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            rotation: LogRotation::Daily,
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Directory log files are written to.
    #[must_use]
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_log_directory)
    }
}

fn secs(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl Config {
    /// Load configuration from an optional file layered under environment variables.
    ///
    /// A missing file is not an error; defaults and environment apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails validation.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform default location.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(default_config_path())
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MultipleValidationErrors`] listing each invalid field.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.broker.host.trim().is_empty() {
            invalid("broker.host", "must not be empty");
        }
        if self.broker.port == 0 {
            invalid("broker.port", "must be non-zero");
        }
        if self.broker.publish_timeout_ms == 0 {
            invalid("broker.publish_timeout_ms", "must be at least 1");
        }
        if self.broker.username.is_some() && self.broker.password.is_none() {
            invalid("broker.password", "required when broker.username is set");
        }
        if self.scanner.name_prefix.is_empty() {
            invalid("scanner.name_prefix", "must not be empty");
        }
        if self.scanner.scan_window_secs == 0 {
            invalid("scanner.scan_window_secs", "must be at least 1");
        }
        if self.presence.topic_prefix.is_empty() {
            invalid("presence.topic_prefix", "must not be empty");
        }
        if self.presence.topic_prefix.contains(['+', '#']) {
            invalid(
                "presence.topic_prefix",
                "must not contain MQTT wildcards '+' or '#'",
            );
        }
        if self.presence.rssi_hysteresis_dbm == 0 {
            invalid("presence.rssi_hysteresis_dbm", "must be at least 1");
        }
        if self.presence.triggered_timeout_secs > self.presence.idle_timeout_secs {
            invalid(
                "presence.triggered_timeout_secs",
                "must not exceed presence.idle_timeout_secs",
            );
        }

        if self.logging.level.trim().is_empty() {
            invalid("logging.level", "must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MultipleValidationErrors(errors))
        }
    }
}

/// Returns the default configuration file path.
///
/// On Linux: `/etc/beacon-bridge/config.toml`
/// Elsewhere: the platform config directory for `beacon-bridge`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/beacon-bridge/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon-bridge")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }
}

/// Returns the default log directory.
///
/// On Linux: `/var/log/beacon-bridge`
/// Elsewhere: a `logs` directory under the platform data directory.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/beacon-bridge")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon-bridge")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
