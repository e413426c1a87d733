//! Cartridge manifest (`cartridge.toml`)
//!
//! Validation is a pure parse and check: nothing is mounted or read besides
//! the bytes handed in. The entry path goes through the same lexical policy
//! the namespace applies, so a manifest pointing outside its cartridge is
//! rejected before any mount happens.
//!
//! # Example
//!
//! ```
//! use tinbox_script::CartridgeManifest;
//!
//! let manifest = CartridgeManifest::validate(br#"
//! id = "pong"
//! title = "Pong"
//! version = "1.0.0"
//! api_version = "0.1"
//! entry = "main.ron"
//!
//! [permissions]
//! audio = false
//! "#).unwrap();
//!
//! assert_eq!(manifest.id, "pong");
//! assert_eq!(manifest.entry.to_string(), "cart:/main.ron");
//! assert!(!manifest.permissions.audio);
//! assert_eq!(manifest.display.canvas_size(), (960, 540));
//! ```

use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use tinbox_core::ResourceHints;
use tinbox_vfs::{NamespaceKind, VirtualPath};

/// File name of the manifest inside a cartridge directory
pub const MANIFEST_FILE: &str = "cartridge.toml";
/// The only supported `api_version`
pub const SUPPORTED_API_VERSION: &str = "0.1";

const MAX_ID_LEN: usize = 64;
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aspect {
    #[default]
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "4:3")]
    Classic,
    #[serde(rename = "any")]
    Any,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    #[default]
    Fit,
    IntegerNearest,
    Fill,
    Stretch,
}

/// `[display]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayHints {
    pub aspect: Aspect,
    pub preset: Preset,
    pub scaling: Scaling,
    pub allow_user_override: bool,
}

impl Default for DisplayHints {
    fn default() -> Self {
        Self {
            aspect: Aspect::Wide,
            preset: Preset::Medium,
            scaling: Scaling::Fit,
            allow_user_override: true,
        }
    }
}

impl DisplayHints {
    /// Canvas size in pixels for the preset and aspect
    pub fn canvas_size(&self) -> (u32, u32) {
        match (self.aspect, self.preset) {
            (Aspect::Classic, Preset::Low) => (400, 300),
            (Aspect::Classic, Preset::Medium) => (800, 600),
            (Aspect::Classic, Preset::High) => (1600, 1200),
            (Aspect::Classic, Preset::Ultra) => (3200, 2400),
            (_, Preset::Low) => (480, 270),
            (_, Preset::Medium) => (960, 540),
            (_, Preset::High) => (1920, 1080),
            (_, Preset::Ultra) => (3840, 2160),
        }
    }
}

/// `[permissions]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub save_storage: bool,
    pub audio: bool,
    pub net: bool,
    pub native: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            save_storage: true,
            audio: true,
            net: false,
            native: false,
        }
    }
}

/// `[caps]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Caps {
    /// CPU time granted per update, turned into an operation budget
    pub cpu_ms_per_update: f64,
    pub vm_memory_mb: u64,
    /// Draw commands accepted per frame
    pub max_draw_calls: u32,
    pub max_canvas_pixels: u64,
    pub audio_channels: u32,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            cpu_ms_per_update: 2.0,
            vm_memory_mb: 64,
            max_draw_calls: 20_000,
            max_canvas_pixels: 16_777_216,
            audio_channels: 32,
        }
    }
}

/// `[limits]` section; each entry can only lower the host limit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitHints {
    pub max_file_bytes: Option<u64>,
    pub max_asset_bytes: Option<u64>,
    pub save_quota_bytes: Option<u64>,
    pub log_per_second: Option<u64>,
}

/// Manifest as written; required fields are optional here so a missing one
/// gets its own error code instead of a generic parse failure
#[derive(Debug, Deserialize)]
struct RawManifest {
    id: Option<String>,
    title: Option<String>,
    version: Option<String>,
    api_version: Option<String>,
    entry: Option<String>,
    #[serde(default)]
    display: DisplayHints,
    #[serde(default)]
    permissions: Permissions,
    #[serde(default)]
    caps: Caps,
    #[serde(default)]
    limits: LimitHints,
}

/// A validated cartridge manifest
#[derive(Debug, Clone, PartialEq)]
pub struct CartridgeManifest {
    pub id: String,
    pub title: String,
    pub version: String,
    pub api_version: String,
    /// Entry script, always in the cartridge namespace
    pub entry: VirtualPath,
    pub display: DisplayHints,
    pub permissions: Permissions,
    pub caps: Caps,
    pub limits: LimitHints,
}

impl CartridgeManifest {
    /// Parse and check a manifest
    pub fn validate(raw: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| ManifestError::Malformed("manifest is not valid UTF-8".to_string()))?;
        let raw: RawManifest =
            toml::from_str(text).map_err(|err| ManifestError::Malformed(err.message().to_string()))?;

        let id = required(raw.id, "id")?;
        let title = required(raw.title, "title")?;
        let version = required(raw.version, "version")?;
        let api_version = required(raw.api_version, "api_version")?;
        let entry = required(raw.entry, "entry")?;

        if api_version != SUPPORTED_API_VERSION {
            return Err(ManifestError::UnsupportedSchema(api_version));
        }
        check_id(&id)?;
        if title.trim().is_empty() {
            return Err(ManifestError::InvalidValue {
                field: "title",
                reason: "must not be empty".to_string(),
            });
        }
        let entry = check_entry(&entry)?;

        if raw.permissions.net {
            return Err(ManifestError::UnsupportedPermission("net"));
        }
        if raw.permissions.native {
            return Err(ManifestError::UnsupportedPermission("native"));
        }
        check_caps(&raw.caps)?;

        Ok(Self {
            id,
            title,
            version,
            api_version,
            entry,
            display: raw.display,
            permissions: raw.permissions,
            caps: raw.caps,
            limits: raw.limits,
        })
    }

    /// Resource ceilings the cartridge asks for
    pub fn resource_hints(&self) -> ResourceHints {
        ResourceHints {
            vm_memory: Some(self.caps.vm_memory_mb.saturating_mul(MIB)),
            file_size: self.limits.max_file_bytes,
            asset_bytes: self.limits.max_asset_bytes,
            save_bytes: self.limits.save_quota_bytes,
            log_rate: self.limits.log_per_second,
        }
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ManifestError> {
    value.ok_or(ManifestError::MissingField(field))
}

fn check_id(id: &str) -> Result<(), ManifestError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id != "."
        && id != ".."
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(ManifestError::InvalidValue {
            field: "id",
            reason: format!(
                "{:?} must be 1-{} characters of [A-Za-z0-9._-]",
                id, MAX_ID_LEN
            ),
        })
    }
}

fn check_entry(entry: &str) -> Result<VirtualPath, ManifestError> {
    let invalid = |reason: String| ManifestError::InvalidEntry {
        path: entry.to_string(),
        reason,
    };
    let path = VirtualPath::parse(entry).map_err(|err| invalid(err.to_string()))?;
    if path.kind() != NamespaceKind::Cart {
        return Err(invalid("entry must live in the cartridge namespace".to_string()));
    }
    if path.is_root() {
        return Err(invalid("entry must name a file".to_string()));
    }
    Ok(path)
}

fn check_caps(caps: &Caps) -> Result<(), ManifestError> {
    if !(caps.cpu_ms_per_update.is_finite()
        && caps.cpu_ms_per_update > 0.0
        && caps.cpu_ms_per_update <= 1000.0)
    {
        return Err(ManifestError::InvalidValue {
            field: "caps.cpu_ms_per_update",
            reason: format!("{} is outside (0, 1000]", caps.cpu_ms_per_update),
        });
    }
    let positive: [(&'static str, u64); 4] = [
        ("caps.vm_memory_mb", caps.vm_memory_mb),
        ("caps.max_draw_calls", caps.max_draw_calls as u64),
        ("caps.max_canvas_pixels", caps.max_canvas_pixels),
        ("caps.audio_channels", caps.audio_channels as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(ManifestError::InvalidValue {
                field,
                reason: "must be greater than zero".to_string(),
            });
        }
    }
    Ok(())
}
