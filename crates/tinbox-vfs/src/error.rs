//! Error types for tinbox-vfs

use std::io;
use thiserror::Error;
use tinbox_core::{ErrorKind, Status};

/// Namespace error type
///
/// Security violations (`PathEscape`, `PermissionDenied`) are kept apart from
/// ordinary misses (`NotFound`) so callers can tell an attack from a typo.
#[derive(Error, Debug)]
pub enum VfsError {
    #[error("Path escapes its namespace: {0}")]
    PathEscape(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(String),

    #[error("Invalid mount: {0}")]
    InvalidMount(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl VfsError {
    /// Wrap an I/O error, turning "not found" into [`VfsError::NotFound`]
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            VfsError::NotFound(path)
        } else {
            VfsError::Io { path, source }
        }
    }

    /// Status category for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::PathEscape(_) | VfsError::PermissionDenied(_) => {
                ErrorKind::PermissionDenied
            }
            VfsError::QuotaExceeded(_) => ErrorKind::ResourceExhausted,
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::InvalidPath(_) | VfsError::InvalidUtf8(_) => ErrorKind::InvalidArgument,
            VfsError::InvalidMount(_) => ErrorKind::FailedPrecondition,
            VfsError::Io { .. } => ErrorKind::Unavailable,
        }
    }

    /// Check if this error is a blocked attempt to leave the sandbox
    pub fn is_security_violation(&self) -> bool {
        matches!(self, VfsError::PathEscape(_) | VfsError::PermissionDenied(_))
    }
}

impl From<VfsError> for Status {
    fn from(err: VfsError) -> Self {
        Status::new(err.kind(), err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, VfsError>;
