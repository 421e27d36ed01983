//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Grace period used when neither the file nor the environment sets one.
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Longest grace period or poll interval the configuration accepts.
pub const MAX_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval between two idle checks while draining.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Demo HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Graceful shutdown settings
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Demo HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address and port to listen on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// Maximum time to wait for the event loop to go idle before forcing a stop
    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub deadline: Duration,

    /// How often the drain loop re-checks the event loop
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_SHUTDOWN_DEADLINE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ShutdownConfig {
    /// Defaults, with the deadline overridden by the environment when set.
    pub fn from_env() -> Result<Self, super::ConfigError> {
        let mut config = Self::default();
        super::apply_deadline_override(&mut config, super::read_deadline_env()?.as_deref())?;
        Ok(config)
    }

    /// Override the grace period.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Config {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, super::ConfigError> {
        Ok(Self {
            shutdown: ShutdownConfig::from_env()?,
            ..Self::default()
        })
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8888))
}

fn default_deadline() -> Duration {
    DEFAULT_SHUTDOWN_DEADLINE
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
