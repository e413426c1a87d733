//! Status channel shared by every tinbox component
//!
//! Fallible operations return [`Result<T>`], i.e. `Ok(T)` or a [`Status`]
//! carrying an [`ErrorKind`] and a human-readable message. Numeric codes are
//! stable; new kinds are only ever appended.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input: manifest fields, binding arguments, paths
    InvalidArgument,
    /// The named file, function or handle does not exist
    NotFound,
    /// A security boundary refused the operation
    PermissionDenied,
    /// A quota, memory ceiling or rate limit would be exceeded
    ResourceExhausted,
    /// The system is not in a state that allows the operation
    FailedPrecondition,
    /// An internal invariant was broken
    Internal,
    /// A host resource (disk, file handle) could not be used
    Unavailable,
}

impl ErrorKind {
    /// Stable numeric code (0 is reserved for `Ok`)
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::InvalidArgument => 3,
            ErrorKind::NotFound => 5,
            ErrorKind::PermissionDenied => 7,
            ErrorKind::ResourceExhausted => 8,
            ErrorKind::FailedPrecondition => 9,
            ErrorKind::Internal => 13,
            ErrorKind::Unavailable => 14,
        }
    }

    /// Look up a kind by its numeric code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            3 => Some(ErrorKind::InvalidArgument),
            5 => Some(ErrorKind::NotFound),
            7 => Some(ErrorKind::PermissionDenied),
            8 => Some(ErrorKind::ResourceExhausted),
            9 => Some(ErrorKind::FailedPrecondition),
            13 => Some(ErrorKind::Internal),
            14 => Some(ErrorKind::Unavailable),
            _ => None,
        }
    }

    /// Name used in diagnostics and script-visible error strings
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::ResourceExhausted => "ResourceExhausted",
            ErrorKind::FailedPrecondition => "FailedPrecondition",
            ErrorKind::Internal => "Internal",
            ErrorKind::Unavailable => "Unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed operation
///
/// A status built with [`Status::fatal`] marks a broken invariant that ends
/// the cartridge session; every other status is recoverable.
///
/// # Example
///
/// ```
/// use tinbox_core::{ErrorKind, Status};
///
/// let status = Status::new(ErrorKind::NotFound, "cart:/missing.png");
/// assert_eq!(status.kind(), ErrorKind::NotFound);
/// assert_eq!(status.code(), 5);
/// assert!(!status.is_fatal());
/// assert_eq!(status.to_string(), "NotFound: cart:/missing.png");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Status {
    kind: ErrorKind,
    message: String,
    fatal: bool,
}

impl Status {
    /// Create a recoverable status
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fatal: false,
        }
    }

    /// Create a status that ends the cartridge session
    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fatal: true,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the stable numeric code
    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    /// Get the message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check if this status ends the session
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Promote this status to a fatal one
    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Prefix the message with some context
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Status>;
