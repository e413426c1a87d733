//! Error types for tinbox-script

use thiserror::Error;
use tinbox_core::{ErrorKind, Status};
use tinbox_vfs::VfsError;

/// Script loading error type
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("RON parse error in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error(transparent)]
    Vfs(#[from] VfsError),
}

impl From<ScriptError> for Status {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::Parse { .. } => Status::invalid_argument(err.to_string()),
            ScriptError::Vfs(err) => err.into(),
        }
    }
}

/// Why a cartridge manifest was rejected
///
/// Every variant has a stable numeric [`code`](ManifestError::code) so
/// automated rejection tests do not depend on message wording.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported api_version {0:?}")]
    UnsupportedSchema(String),

    #[error("invalid entry path {path:?}: {reason}")]
    InvalidEntry { path: String, reason: String },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unsupported permission `{0}`")]
    UnsupportedPermission(&'static str),
}

impl ManifestError {
    /// Stable rejection code
    pub fn code(&self) -> u32 {
        match self {
            ManifestError::Malformed(_) => 100,
            ManifestError::MissingField(_) => 101,
            ManifestError::UnsupportedSchema(_) => 102,
            ManifestError::InvalidEntry { .. } => 103,
            ManifestError::InvalidValue { .. } => 104,
            ManifestError::UnsupportedPermission(_) => 105,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ManifestError::UnsupportedSchema(_) | ManifestError::UnsupportedPermission(_) => {
                ErrorKind::FailedPrecondition
            }
            _ => ErrorKind::InvalidArgument,
        }
    }
}

impl From<ManifestError> for Status {
    fn from(err: ManifestError) -> Self {
        Status::new(err.kind(), format!("manifest error {}: {}", err.code(), err))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_codes_are_stable() {
        let cases = [
            (ManifestError::Malformed(String::new()), 100),
            (ManifestError::MissingField("entry"), 101),
            (ManifestError::UnsupportedSchema("9.9".into()), 102),
            (
                ManifestError::InvalidEntry {
                    path: "../x".into(),
                    reason: String::new(),
                },
                103,
            ),
            (
                ManifestError::InvalidValue {
                    field: "id",
                    reason: String::new(),
                },
                104,
            ),
            (ManifestError::UnsupportedPermission("net"), 105),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_manifest_error_to_status() {
        let status: Status = ManifestError::UnsupportedSchema("2.0".into()).into();
        assert_eq!(status.kind(), ErrorKind::FailedPrecondition);
        assert!(status.message().contains("102"));

        let status: Status = ManifestError::MissingField("entry").into();
        assert_eq!(status.kind(), ErrorKind::InvalidArgument);
    }
}
