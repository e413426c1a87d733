//! Tinbox VFS - Sandboxed filesystem namespaces for cartridges
//!
//! Scripts address files through virtual paths (`cart:/...`, `save:/...`).
//! This crate maps them onto host directories without ever letting a path,
//! or a link on disk, reach outside the mounted roots.
//!
//! - [`VirtualPath`]: lexical policy, identical on every platform
//! - [`canon`]: link-aware containment against canonical roots
//! - [`Namespace`]: the mounted cartridge with quota-checked I/O

pub mod canon;
mod error;
mod namespace;
mod path;

pub use canon::{Canonicalize, HostCanonicalizer};
pub use error::{Result, VfsError};
pub use namespace::{DirEntry, EntryKind, FileStat, MountPolicy, MountRoots, Namespace};
pub use path::{NamespaceKind, VirtualPath, MAX_DEPTH, MAX_PATH_LEN, MAX_SEGMENT_LEN};
