//! Configuration file loading and environment overrides.

use crate::config::{validate_config, Config, ShutdownConfig, MAX_SHUTDOWN_DEADLINE};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the shutdown grace period, in whole seconds.
pub const DEADLINE_ENV: &str = "SHUTDOWN_DEADLINE";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    #[error(
        "invalid value {value:?} for {name}: expected whole seconds up to {}",
        MAX_SHUTDOWN_DEADLINE.as_secs()
    )]
    InvalidEnv { name: &'static str, value: String },
}

/// Load configuration from a YAML file.
///
/// Reads and parses the file, applies the [`DEADLINE_ENV`] override, then
/// validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents, read_deadline_env()?.as_deref())
}

fn parse_config(contents: &str, deadline_override: Option<&str>) -> Result<Config, ConfigError> {
    let mut config: Config = serde_yaml::from_str(contents)?;
    apply_deadline_override(&mut config.shutdown, deadline_override)?;
    validate_config(&config).map_err(ConfigError::ValidationError)?;

    Ok(config)
}

/// Replace the grace period with a raw [`DEADLINE_ENV`] value.
///
/// `None` and blank values leave the configured deadline alone.
pub fn apply_deadline_override(
    shutdown: &mut ShutdownConfig,
    raw: Option<&str>,
) -> Result<(), ConfigError> {
    if let Some(deadline) = raw.map(parse_deadline).transpose()?.flatten() {
        shutdown.deadline = deadline;
    }
    Ok(())
}

/// Read the grace period override from the environment.
///
/// Returns `Ok(None)` when the variable is absent or empty.
pub fn deadline_from_env() -> Result<Option<Duration>, ConfigError> {
    match read_deadline_env()? {
        Some(raw) => parse_deadline(&raw),
        None => Ok(None),
    }
}

pub(crate) fn read_deadline_env() -> Result<Option<String>, ConfigError> {
    match std::env::var(DEADLINE_ENV) {
        Ok(raw) => Ok(Some(raw)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(raw)) => Err(ConfigError::InvalidEnv {
            name: DEADLINE_ENV,
            value: raw.to_string_lossy().into_owned(),
        }),
    }
}

fn parse_deadline(raw: &str) -> Result<Option<Duration>, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs <= MAX_SHUTDOWN_DEADLINE.as_secs())
        .map(|secs| Some(Duration::from_secs(secs)))
        .ok_or_else(|| ConfigError::InvalidEnv {
            name: DEADLINE_ENV,
            value: raw.to_string(),
        })
}
