//! Host path canonicalization and containment
//!
//! The lexical policy in [`crate::path`] cannot see links on disk. Before a
//! host path is touched, every existing component is inspected with
//! `symlink_metadata`; links are resolved through a [`Canonicalize`]
//! implementation and must land inside the namespace root.

use crate::error::{Result, VfsError};
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves a host path to its canonical form
pub trait Canonicalize {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Canonicalizer backed by the host filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCanonicalizer;

#[cfg(not(windows))]
impl Canonicalize for HostCanonicalizer {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }
}

#[cfg(windows)]
impl Canonicalize for HostCanonicalizer {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let canonical = fs::canonicalize(path)?;
        Ok(match canonical.to_str() {
            Some(s) => PathBuf::from(strip_verbatim_prefix(s).into_owned()),
            None => canonical,
        })
    }
}

/// Strip the Windows verbatim prefix (`\\?\` or `\\?\UNC\`)
///
/// Both roots and candidates go through the same canonicalizer, so this only
/// keeps paths readable in diagnostics; containment does not depend on it.
pub fn strip_verbatim_prefix(path: &str) -> Cow<'_, str> {
    if let Some(rest) = path.strip_prefix(r"\\?\UNC\") {
        Cow::Owned(format!(r"\\{}", rest))
    } else if let Some(rest) = path.strip_prefix(r"\\?\") {
        Cow::Borrowed(rest)
    } else {
        Cow::Borrowed(path)
    }
}

/// Join `segments` onto a canonical `root`, refusing to leave it
///
/// Components that do not exist yet are appended lexically; they are already
/// free of `..` and separators. A link whose target cannot be resolved fails
/// closed as an escape.
pub fn contain(
    canon: &dyn Canonicalize,
    root: &Path,
    segments: &[String],
    display: &str,
) -> Result<PathBuf> {
    let mut current = root.to_path_buf();
    for (i, segment) in segments.iter().enumerate() {
        current.push(segment);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = canon.canonicalize(&current).map_err(|_| {
                    VfsError::PathEscape(format!("{} goes through an unresolvable link", display))
                })?;
                if !target.starts_with(root) {
                    return Err(VfsError::PathEscape(format!(
                        "{} links outside its namespace",
                        display
                    )));
                }
                current = target;
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                current.extend(&segments[i + 1..]);
                return Ok(current);
            }
            Err(err) => return Err(VfsError::io(display, err)),
        }
    }

    // Catch anything the walk cannot see as a link (e.g. reparse points)
    if !segments.is_empty() {
        let resolved = canon
            .canonicalize(&current)
            .map_err(|err| VfsError::io(display, err))?;
        if !resolved.starts_with(root) {
            return Err(VfsError::PathEscape(format!(
                "{} resolves outside its namespace",
                display
            )));
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_verbatim_prefix() {
        assert_eq!(strip_verbatim_prefix(r"\\?\C:\carts\demo"), r"C:\carts\demo");
        assert_eq!(
            strip_verbatim_prefix(r"\\?\UNC\server\share\demo"),
            r"\\server\share\demo"
        );
        assert_eq!(strip_verbatim_prefix("/home/carts/demo"), "/home/carts/demo");
    }

    #[test]
    fn test_contain_missing_tail() {
        let dir = tempfile::tempdir().unwrap();
        let root = HostCanonicalizer.canonicalize(dir.path()).unwrap();
        let segments = vec!["new".to_string(), "file.bin".to_string()];
        let path = contain(&HostCanonicalizer, &root, &segments, "save:/new/file.bin").unwrap();
        assert_eq!(path, root.join("new").join("file.bin"));
    }

    #[test]
    fn test_contain_existing() {
        let dir = tempfile::tempdir().unwrap();
        let root = HostCanonicalizer.canonicalize(dir.path()).unwrap();
        fs::create_dir(root.join("assets")).unwrap();
        fs::write(root.join("assets").join("a.txt"), b"a").unwrap();
        let segments = vec!["assets".to_string(), "a.txt".to_string()];
        let path = contain(&HostCanonicalizer, &root, &segments, "assets/a.txt").unwrap();
        assert_eq!(path, root.join("assets").join("a.txt"));
    }

    /// Pretends every link points at a fixed location
    struct Redirect(PathBuf);

    impl Canonicalize for Redirect {
        fn canonicalize(&self, _path: &Path) -> io::Result<PathBuf> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_contain_uses_canonicalizer_for_final_check() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let root = HostCanonicalizer.canonicalize(dir.path()).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();

        let redirect = Redirect(outside.path().to_path_buf());
        let err = contain(&redirect, &root, &["a.txt".to_string()], "a.txt").unwrap_err();
        assert!(matches!(err, VfsError::PathEscape(_)));
    }
}
