//! Per-cartridge namespace
//!
//! A [`Namespace`] owns two host roots: the cartridge directory (read-only to
//! scripts) and a per-cartridge save directory (the only script-writable
//! place). Every operation parses the virtual path, resolves it inside the
//! right root and checks the shared resource budget before touching disk.

use crate::canon::{contain, Canonicalize, HostCanonicalizer};
use crate::error::{Result, VfsError};
use crate::path::{NamespaceKind, VirtualPath};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tinbox_core::{Resource, SharedBudget, Status};
use tracing::{debug, warn};

/// Host directories backing a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRoots {
    /// The cartridge directory; must exist
    pub cart_root: PathBuf,
    /// This cartridge's save directory; created on mount when saving is enabled
    pub save_root: PathBuf,
}

impl MountRoots {
    /// Roots for a cartridge, with saves under `<save_base>/<id>`
    pub fn for_cartridge(
        cart_root: impl Into<PathBuf>,
        save_base: impl AsRef<Path>,
        id: &str,
    ) -> Self {
        Self {
            cart_root: cart_root.into(),
            save_root: save_base.as_ref().join(id),
        }
    }
}

/// What a mounted cartridge may do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPolicy {
    /// Whether the save namespace is available at all
    pub save_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Dir,
}

/// Metadata for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: EntryKind,
    pub size: u64,
}

/// One directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// A mounted cartridge namespace
pub struct Namespace {
    cart_root: PathBuf,
    save_root: PathBuf,
    policy: MountPolicy,
    budget: SharedBudget,
    canon: Box<dyn Canonicalize>,
    /// Cart assets already charged against `AssetBytes`
    loaded: HashMap<String, u64>,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("cart_root", &self.cart_root)
            .field("save_root", &self.save_root)
            .field("policy", &self.policy)
            .field("loaded", &self.loaded.len())
            .finish()
    }
}

impl Namespace {
    /// Mount using the host canonicalizer
    pub fn mount(roots: MountRoots, policy: MountPolicy, budget: SharedBudget) -> Result<Self> {
        Self::mount_with(roots, policy, budget, Box::new(HostCanonicalizer))
    }

    /// Mount with an explicit canonicalizer
    ///
    /// Existing save data is measured and charged against `SaveBytes`; a save
    /// directory already above the hard ceiling refuses the mount.
    pub fn mount_with(
        roots: MountRoots,
        policy: MountPolicy,
        budget: SharedBudget,
        canon: Box<dyn Canonicalize>,
    ) -> Result<Self> {
        let cart_display = roots.cart_root.display().to_string();
        let cart_root = canon
            .canonicalize(&roots.cart_root)
            .map_err(|err| VfsError::io(cart_display.clone(), err))?;
        if !cart_root.is_dir() {
            return Err(VfsError::InvalidMount(format!(
                "{} is not a directory",
                cart_display
            )));
        }

        let save_root = if policy.save_enabled {
            fs::create_dir_all(&roots.save_root)
                .map_err(|err| VfsError::io(roots.save_root.display().to_string(), err))?;
            canon
                .canonicalize(&roots.save_root)
                .map_err(|err| VfsError::io(roots.save_root.display().to_string(), err))?
        } else {
            roots.save_root
        };

        if save_root.starts_with(&cart_root) || cart_root.starts_with(&save_root) {
            return Err(VfsError::InvalidMount(format!(
                "save root {} overlaps cartridge root {}",
                save_root.display(),
                cart_root.display()
            )));
        }

        if policy.save_enabled {
            let used = directory_size(&save_root)?;
            budget
                .borrow_mut()
                .rebase(Resource::SaveBytes, used)
                .map_err(quota)?;
            debug!(save_root = %save_root.display(), used, "save namespace mounted");
        }
        debug!(cart_root = %cart_root.display(), "cartridge namespace mounted");

        Ok(Self {
            cart_root,
            save_root,
            policy,
            budget,
            canon,
            loaded: HashMap::new(),
        })
    }

    pub fn root(&self, kind: NamespaceKind) -> &Path {
        match kind {
            NamespaceKind::Cart => &self.cart_root,
            NamespaceKind::Save => &self.save_root,
        }
    }

    pub fn policy(&self) -> MountPolicy {
        self.policy
    }

    pub fn budget(&self) -> &SharedBudget {
        &self.budget
    }

    /// Resolve a virtual path to a host path inside the `kind` root
    ///
    /// Unprefixed paths default to `kind`; a prefix naming the other
    /// namespace is refused.
    pub fn resolve(&self, path: &str, kind: NamespaceKind) -> Result<PathBuf> {
        let vpath = VirtualPath::parse_in(path, kind)?;
        if vpath.kind() != kind {
            return Err(VfsError::PermissionDenied(format!(
                "{} is outside the {} namespace",
                vpath, kind
            )));
        }
        self.locate(&vpath)
    }

    /// Read a whole file
    ///
    /// The first read of each cartridge file is charged against
    /// `AssetBytes`; re-reads are free.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.load(path, Ok)
    }

    /// Read a whole file as UTF-8
    ///
    /// A file that is not UTF-8 is refused before anything is charged.
    pub fn read_text(&mut self, path: &str) -> Result<String> {
        self.load(path, |data| {
            String::from_utf8(data).map_err(|_| VfsError::InvalidUtf8(path.to_string()))
        })
    }

    /// Read a file and decode it, committing the asset charge only once
    /// `decode` has accepted the data
    fn load<T>(&mut self, path: &str, decode: impl FnOnce(Vec<u8>) -> Result<T>) -> Result<T> {
        let vpath = VirtualPath::parse(path)?;
        let host = self.locate(&vpath)?;
        let meta = fs::metadata(&host).map_err(|err| VfsError::io(vpath.to_string(), err))?;
        if meta.is_dir() {
            return Err(VfsError::InvalidPath(format!("{} is a directory", vpath)));
        }

        let size = meta.len();
        let key = vpath.to_string();
        let first_load = vpath.kind() == NamespaceKind::Cart && !self.loaded.contains_key(&key);
        {
            let budget = self.budget.borrow();
            budget.check_item(Resource::FileSize, size).map_err(quota)?;
            if first_load {
                budget.check(Resource::AssetBytes, size).map_err(quota)?;
            }
        }

        let limit = self.budget.borrow().ceiling(Resource::FileSize).hard;
        let mut data = Vec::with_capacity(size.min(limit) as usize);
        fs::File::open(&host)
            .and_then(|file| file.take(limit.saturating_add(1)).read_to_end(&mut data))
            .map_err(|err| VfsError::io(key.clone(), err))?;
        if data.len() as u64 > limit {
            return Err(VfsError::QuotaExceeded(format!(
                "{} grew past the file size limit",
                vpath
            )));
        }

        let len = data.len() as u64;
        let decoded = decode(data)?;
        if first_load {
            self.budget
                .borrow_mut()
                .charge(Resource::AssetBytes, len)
                .map_err(quota)?;
            self.loaded.insert(key, len);
        }
        Ok(decoded)
    }

    /// Replace a save file's contents
    ///
    /// Anything not prefixed `save:/` is refused before the path is parsed.
    /// Quotas are checked up front; a refused write leaves disk and usage
    /// untouched. The data lands in a freshly created temporary sibling first
    /// and is renamed into place.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let vpath = self.writable(path)?;
        let host = self.locate(&vpath)?;

        let size = data.len() as u64;
        let old = match fs::metadata(&host) {
            Ok(meta) if meta.is_dir() => {
                return Err(VfsError::InvalidPath(format!("{} is a directory", vpath)));
            }
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        {
            let budget = self.budget.borrow();
            budget.check_item(Resource::FileSize, size).map_err(quota)?;
            if size > old {
                budget
                    .check(Resource::SaveBytes, size - old)
                    .map_err(quota)?;
            }
        }

        write_atomic(&host, data).map_err(|err| VfsError::io(vpath.to_string(), err))?;

        let mut budget = self.budget.borrow_mut();
        if size > old {
            budget
                .charge(Resource::SaveBytes, size - old)
                .map_err(quota)?;
        } else {
            budget.release(Resource::SaveBytes, old - size);
        }
        Ok(())
    }

    /// Check if a path names something that exists
    ///
    /// Paths that are invalid or escape the namespace simply do not exist.
    pub fn exists(&self, path: &str) -> bool {
        VirtualPath::parse(path)
            .and_then(|vpath| self.locate(&vpath))
            .map(|host| host.exists())
            .unwrap_or(false)
    }

    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let vpath = VirtualPath::parse(path)?;
        let host = self.locate(&vpath)?;
        let meta = fs::metadata(&host).map_err(|err| VfsError::io(vpath.to_string(), err))?;
        Ok(FileStat {
            kind: if meta.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            },
            size: if meta.is_dir() { 0 } else { meta.len() },
        })
    }

    /// List a directory, sorted by name
    ///
    /// Entries whose names are not valid UTF-8 are skipped.
    pub fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let vpath = VirtualPath::parse(path)?;
        let host = self.locate(&vpath)?;
        let display = vpath.to_string();
        let mut entries = Vec::new();
        for entry in fs::read_dir(&host).map_err(|err| VfsError::io(display.clone(), err))? {
            let entry = entry.map_err(|err| VfsError::io(display.clone(), err))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let kind = match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => EntryKind::Dir,
                _ => EntryKind::File,
            };
            entries.push(DirEntry { name, kind });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Create a directory (and its parents) in the save namespace
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let vpath = self.writable(path)?;
        let host = self.locate(&vpath)?;
        fs::create_dir_all(&host).map_err(|err| VfsError::io(vpath.to_string(), err))
    }

    /// Remove a save file or empty save directory, releasing its bytes
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let vpath = self.writable(path)?;
        let host = self.locate(&vpath)?;
        let meta = fs::symlink_metadata(&host).map_err(|err| VfsError::io(vpath.to_string(), err))?;
        if meta.is_dir() {
            fs::remove_dir(&host).map_err(|err| VfsError::io(vpath.to_string(), err))?;
        } else {
            fs::remove_file(&host).map_err(|err| VfsError::io(vpath.to_string(), err))?;
            self.budget
                .borrow_mut()
                .release(Resource::SaveBytes, meta.len());
        }
        Ok(())
    }

    /// Write into the cartridge root on behalf of host tooling
    ///
    /// Scripts never reach this; the same containment rules apply, but no
    /// budget is charged.
    pub fn host_write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let vpath = VirtualPath::parse(path)?;
        if vpath.kind() != NamespaceKind::Cart || vpath.is_root() {
            return Err(VfsError::PermissionDenied(format!(
                "host writes target cartridge files, not {}",
                vpath
            )));
        }
        let host = self.locate(&vpath)?;
        write_atomic(&host, data).map_err(|err| VfsError::io(vpath.to_string(), err))
    }

    /// Bytes of cartridge assets charged so far
    pub fn loaded_asset_bytes(&self) -> u64 {
        self.loaded.values().sum()
    }

    /// Give back everything this namespace charged
    pub fn unmount(self) {
        let mut budget = self.budget.borrow_mut();
        budget.release(Resource::AssetBytes, self.loaded.values().sum());
        if self.policy.save_enabled {
            budget.reset(Resource::SaveBytes);
        }
        debug!(cart_root = %self.cart_root.display(), "namespace unmounted");
    }

    /// Parse a path for a mutating operation
    fn writable(&self, path: &str) -> Result<VirtualPath> {
        if NamespaceKind::of(path) != Some(NamespaceKind::Save) {
            warn!(path, "write outside save namespace denied");
            return Err(VfsError::PermissionDenied(format!(
                "{:?} is not under save:/",
                path
            )));
        }
        let vpath = VirtualPath::parse(path)?;
        if vpath.is_root() {
            return Err(VfsError::InvalidPath("save:/ itself".to_string()));
        }
        Ok(vpath)
    }

    /// Resolve a parsed path to its host location
    fn locate(&self, vpath: &VirtualPath) -> Result<PathBuf> {
        if vpath.kind() == NamespaceKind::Save && !self.policy.save_enabled {
            return Err(VfsError::PermissionDenied(
                "save storage is not permitted".to_string(),
            ));
        }
        let root = self.root(vpath.kind());
        let vdisplay = vpath.to_string();
        contain(self.canon.as_ref(), root, vpath.segments(), &vdisplay).inspect_err(|err| {
            if err.is_security_violation() {
                warn!(path = %vdisplay, "{}", err);
            }
        })
    }
}

fn quota(status: Status) -> VfsError {
    VfsError::QuotaExceeded(status.message().to_string())
}

/// Write through a fresh sibling and rename it over `host`
///
/// The sibling is created exclusively under an unpredictable name, so an
/// existing file or link in the save directory is never written through or
/// replaced by the temporary.
fn write_atomic(host: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = host.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(host)?;
    Ok(())
}

/// Total size of regular files under `dir`, not following links
fn directory_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let display = current.display().to_string();
        for entry in fs::read_dir(&current).map_err(|err| VfsError::io(display.clone(), err))? {
            let entry = entry.map_err(|err| VfsError::io(display.clone(), err))?;
            let meta = fs::symlink_metadata(entry.path())
                .map_err(|err| VfsError::io(display.clone(), err))?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                total = total.saturating_add(meta.len());
            }
        }
    }
    Ok(total)
}
