//! Configuration validation.

use crate::config::{Config, MAX_SHUTDOWN_DEADLINE};

/// Validate the configuration.
///
/// Checks for:
/// - A non-zero shutdown poll interval
/// - Deadline and poll interval no longer than [`MAX_SHUTDOWN_DEADLINE`]
/// - A known log level
///
/// A zero deadline is accepted; it stops the event loop on the first poll.
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.shutdown.poll_interval.is_zero() {
        errors.push("shutdown.poll_interval must be greater than zero".to_string());
    }

    let limit = humantime::format_duration(MAX_SHUTDOWN_DEADLINE);
    if config.shutdown.deadline > MAX_SHUTDOWN_DEADLINE {
        errors.push(format!("shutdown.deadline must be at most {limit}"));
    }
    if config.shutdown.poll_interval > MAX_SHUTDOWN_DEADLINE {
        errors.push(format!("shutdown.poll_interval must be at most {limit}"));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
