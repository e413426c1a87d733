//! Error types for tinbox-runtime
//!
//! Cartridge operations report through [`tinbox_core::Status`]; only host
//! configuration has its own error type.

use std::path::PathBuf;
use thiserror::Error;
use tinbox_core::Status;

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors from loading or checking a [`RuntimeConfig`](crate::RuntimeConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid RON for this schema
    #[error("config parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// A field holds a value the runtime cannot run with
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The global tracing subscriber could not be installed
    #[error("cannot install logger: {0}")]
    Logging(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for Status {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io { ref source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                Status::not_found(err.to_string())
            }
            ConfigError::Io { .. } => Status::unavailable(err.to_string()),
            ConfigError::Parse(_) | ConfigError::Invalid { .. } => {
                Status::invalid_argument(err.to_string())
            }
            ConfigError::Logging(_) => Status::failed_precondition(err.to_string()),
        }
    }
}

// Compile-time check that ConfigError can cross into `anyhow` in the binary.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<ConfigError>();
}
