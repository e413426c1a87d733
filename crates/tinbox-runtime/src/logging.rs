//! Tracing setup for the `tinbox` binary and other host tools

use crate::error::{ConfigError, ConfigResult};
use tracing_subscriber::EnvFilter;

/// Levels accepted by `--log-level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Filter for a single level across every target
pub fn level_filter(level: &str) -> ConfigResult<EnvFilter> {
    let level = level.trim().to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::invalid(
            "log_level",
            format!("expected one of {}, got {:?}", LOG_LEVELS.join(", "), level),
        ));
    }
    EnvFilter::try_new(&level).map_err(|err| ConfigError::invalid("log_level", err.to_string()))
}

/// `RUST_LOG` when it is set and valid, otherwise `level`
pub fn env_filter(level: &str) -> ConfigResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => level_filter(level),
    }
}

/// Install the global fmt subscriber
pub fn init(level: &str) -> ConfigResult<()> {
    let filter = env_filter(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| ConfigError::Logging(err.to_string()))
}
