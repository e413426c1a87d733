//! Virtual paths and the lexical path policy
//!
//! A virtual path is `<prefix><relative>` where the prefix picks the
//! namespace (`cart:/` or `save:/`; no prefix means `cart:/`). Parsing applies
//! the same rules on every platform, so a cartridge that is rejected on one
//! host is rejected on all of them:
//!
//! - `\` is a separator; empty and `.` segments are dropped
//! - `..` anywhere is an escape
//! - absolute paths, UNC paths and drive letters are escapes
//! - control characters, Windows-reserved characters, reserved device names
//!   and segments ending in `.` or space are invalid

use crate::error::{Result, VfsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted virtual path, in bytes
pub const MAX_PATH_LEN: usize = 1024;
/// Longest accepted segment, in bytes
pub const MAX_SEGMENT_LEN: usize = 255;
/// Deepest accepted nesting
pub const MAX_DEPTH: usize = 32;

const RESERVED_CHARS: &[char] = &['<', '>', '"', '|', '?', '*', ':'];
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Which root a virtual path lives under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamespaceKind {
    /// The cartridge's own files; read-only to scripts
    Cart,
    /// Per-cartridge save data; the only place scripts may write
    Save,
}

impl NamespaceKind {
    pub fn prefix(self) -> &'static str {
        match self {
            NamespaceKind::Cart => "cart:/",
            NamespaceKind::Save => "save:/",
        }
    }

    /// The namespace named by an explicit prefix, without validating the rest
    pub fn of(input: &str) -> Option<NamespaceKind> {
        if input.starts_with("save:") {
            Some(NamespaceKind::Save)
        } else if input.starts_with("cart:") {
            Some(NamespaceKind::Cart)
        } else {
            None
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceKind::Cart => f.write_str("cart"),
            NamespaceKind::Save => f.write_str("save"),
        }
    }
}

/// A parsed, policy-checked virtual path
///
/// # Example
///
/// ```
/// use tinbox_vfs::{NamespaceKind, VirtualPath};
///
/// let path = VirtualPath::parse("save:/slots\\.\\slot1.dat").unwrap();
/// assert_eq!(path.kind(), NamespaceKind::Save);
/// assert_eq!(path.relative(), "slots/slot1.dat");
/// assert_eq!(path.to_string(), "save:/slots/slot1.dat");
///
/// assert!(VirtualPath::parse("../outside.txt").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    kind: NamespaceKind,
    segments: Vec<String>,
}

impl VirtualPath {
    /// Parse a path, defaulting to the cartridge namespace
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_in(input, NamespaceKind::Cart)
    }

    /// Parse a path, using `default` when no prefix is given
    pub fn parse_in(input: &str, default: NamespaceKind) -> Result<Self> {
        if input.len() > MAX_PATH_LEN {
            return Err(VfsError::InvalidPath(format!(
                "path longer than {} bytes",
                MAX_PATH_LEN
            )));
        }
        if input.chars().any(char::is_control) {
            return Err(VfsError::InvalidPath(format!("{:?}", input)));
        }

        let (kind, rest) = split_prefix(input)?;
        let kind = kind.unwrap_or(default);
        let rest = rest.replace('\\', "/");

        if rest.starts_with('/') {
            return Err(VfsError::PathEscape(format!("absolute path {:?}", input)));
        }

        let mut segments = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            check_segment(segment, input)?;
            segments.push(segment.to_string());
        }
        if segments.len() > MAX_DEPTH {
            return Err(VfsError::InvalidPath(format!(
                "more than {} levels deep",
                MAX_DEPTH
            )));
        }

        Ok(Self { kind, segments })
    }

    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Path below the namespace root, `/`-separated
    pub fn relative(&self) -> String {
        self.segments.join("/")
    }

    /// Check if this is the namespace root itself
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.relative())
    }
}

/// Split off an explicit namespace prefix
fn split_prefix(input: &str) -> Result<(Option<NamespaceKind>, &str)> {
    for kind in [NamespaceKind::Cart, NamespaceKind::Save] {
        let scheme = &kind.prefix()[..5];
        if let Some(rest) = input.strip_prefix(scheme) {
            if rest.is_empty() {
                return Ok((Some(kind), rest));
            }
            return match rest.strip_prefix('/') {
                Some(rest) => Ok((Some(kind), rest)),
                None => Err(VfsError::InvalidPath(format!(
                    "expected {} in {:?}",
                    kind.prefix(),
                    input
                ))),
            };
        }
    }

    let first = input.split(['/', '\\']).next().unwrap_or("");
    if let Some((scheme, _)) = first.split_once(':') {
        if is_drive_letter(scheme) {
            return Err(VfsError::PathEscape(format!("drive letter in {:?}", input)));
        }
        return Err(VfsError::InvalidPath(format!(
            "unknown namespace {:?}",
            scheme
        )));
    }
    Ok((None, input))
}

fn is_drive_letter(s: &str) -> bool {
    s.len() == 1 && s.chars().all(|c| c.is_ascii_alphabetic())
}

fn check_segment(segment: &str, input: &str) -> Result<()> {
    if segment == ".." {
        return Err(VfsError::PathEscape(format!("parent segment in {:?}", input)));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(VfsError::InvalidPath(format!(
            "segment longer than {} bytes",
            MAX_SEGMENT_LEN
        )));
    }
    // Windows silently strips trailing dots and spaces, so "..." and ".. "
    // would act as a parent reference there
    if segment.ends_with(['.', ' ']) {
        let trimmed = segment.trim_end_matches(['.', ' ']);
        if trimmed.is_empty() {
            return Err(VfsError::PathEscape(format!("parent segment in {:?}", input)));
        }
        return Err(VfsError::InvalidPath(format!(
            "segment {:?} ends with a dot or space",
            segment
        )));
    }
    if let Some((drive, _)) = segment.split_once(':') {
        if is_drive_letter(drive) {
            return Err(VfsError::PathEscape(format!("drive letter in {:?}", input)));
        }
    }
    if segment.contains(RESERVED_CHARS) {
        return Err(VfsError::InvalidPath(format!(
            "reserved character in {:?}",
            segment
        )));
    }
    let stem = segment.split('.').next().unwrap_or(segment);
    if RESERVED_NAMES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(stem))
    {
        return Err(VfsError::InvalidPath(format!(
            "reserved device name {:?}",
            segment
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<VirtualPath> {
        VirtualPath::parse(input)
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(parse("main.ron").unwrap().kind(), NamespaceKind::Cart);
        assert_eq!(parse("cart:/main.ron").unwrap().kind(), NamespaceKind::Cart);
        assert_eq!(parse("save:/slot1.dat").unwrap().kind(), NamespaceKind::Save);
        assert!(parse("save:").unwrap().is_root());
        assert!(parse("save:/").unwrap().is_root());
        assert!(matches!(parse("save:slot"), Err(VfsError::InvalidPath(_))));
        assert!(matches!(parse("http://x"), Err(VfsError::InvalidPath(_))));
    }

    #[test]
    fn test_default_namespace() {
        let path = VirtualPath::parse_in("slot1.dat", NamespaceKind::Save).unwrap();
        assert_eq!(path.kind(), NamespaceKind::Save);
        // An explicit prefix wins over the default
        let path = VirtualPath::parse_in("cart:/a", NamespaceKind::Save).unwrap();
        assert_eq!(path.kind(), NamespaceKind::Cart);
    }

    #[test]
    fn test_normalization() {
        let path = parse("cart:/assets//./img\\ship.png").unwrap();
        assert_eq!(path.segments(), ["assets", "img", "ship.png"]);
        assert_eq!(path.file_name(), Some("ship.png"));
        assert_eq!(path.to_string(), "cart:/assets/img/ship.png");
    }

    #[test]
    fn test_escapes() {
        let escapes = [
            "..",
            "../evil",
            "assets/../../etc/passwd",
            "assets\\..\\..\\x",
            "save:/../x",
            "/etc/passwd",
            "\\\\server\\share\\x",
            "cart://etc/passwd",
            "save:/\\x",
            "C:/Windows/system32",
            "c:foo",
            "save:/C:/x",
            "assets/...",
            "assets/.. /x",
        ];
        for input in escapes {
            assert!(
                matches!(parse(input), Err(VfsError::PathEscape(_))),
                "{:?} should be an escape, got {:?}",
                input,
                parse(input)
            );
        }
    }

    #[test]
    fn test_invalid() {
        let invalid = [
            "nul",
            "assets/CON.txt",
            "com1",
            "a\0b",
            "a\nb",
            "file.txt:stream",
            "what?",
            "name.",
            "name ",
        ];
        for input in invalid {
            assert!(
                matches!(parse(input), Err(VfsError::InvalidPath(_))),
                "{:?} should be invalid, got {:?}",
                input,
                parse(input)
            );
        }
    }

    #[test]
    fn test_length_limits() {
        let long = "a".repeat(MAX_PATH_LEN + 1);
        assert!(parse(&long).is_err());
        let deep = vec!["d"; MAX_DEPTH + 1].join("/");
        assert!(parse(&deep).is_err());
        let segment = "s".repeat(MAX_SEGMENT_LEN + 1);
        assert!(parse(&segment).is_err());
    }

    #[test]
    fn test_namespace_of_ignores_validity() {
        assert_eq!(NamespaceKind::of("save:/../x"), Some(NamespaceKind::Save));
        assert_eq!(NamespaceKind::of("../evil"), None);
        assert_eq!(NamespaceKind::of("/etc/passwd"), None);
    }
}
