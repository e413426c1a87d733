//! Runtime Configuration - Host-wide settings for running cartridges
//!
//! A [`RuntimeConfig`] is usually read from a RON file. Every field has a
//! default, so a file only needs the settings it changes:
//!
//! ```ron
//! (
//!     tick_hz: 30,
//!     save_root: "/var/lib/tinbox/saves",
//!     limits: (
//!         vm_memory: (soft: 16777216, hard: 33554432),
//!     ),
//! )
//! ```
//!
//! The resource `limits` are the host's ceilings. A cartridge's manifest
//! hints are merged on top of them at load time and can only lower them.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tinbox_core::log::DEFAULT_LOG_CAPACITY;
use tinbox_core::time::{DEFAULT_MAX_FRAME_TIME, DEFAULT_MAX_UPDATES_PER_FRAME, DEFAULT_TICK_HZ};
use tinbox_core::{BudgetLimits, Resource, TickScheduler, DEFAULT_SEED};
use tinbox_script::HostOptions;

/// Highest accepted tick rate
pub const MAX_TICK_HZ: u32 = 1000;

/// Highest accepted per-frame update cap
pub const MAX_UPDATES_PER_FRAME: u32 = 64;

/// Host ceilings for every tracked resource
pub type HostLimits = BudgetLimits;

/// Configuration for the cartridge runtime
///
/// # Example
///
/// ```
/// use tinbox_runtime::RuntimeConfig;
///
/// // Defaults: 60 Hz, at most 4 updates per frame
/// let config = RuntimeConfig::default();
/// assert_eq!(config.tick_hz, 60);
/// assert_eq!(config.max_updates_per_frame, 4);
///
/// // A file only names what it changes
/// let config = RuntimeConfig::from_ron("(tick_hz: 30, seed: 7)").unwrap();
/// assert_eq!(config.tick_hz, 30);
/// assert_eq!(config.seed, 7);
/// assert_eq!(config.log_capacity, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Fixed simulation rate in updates per second
    pub tick_hz: u32,
    /// Updates run per frame before leftover time is dropped
    pub max_updates_per_frame: u32,
    /// Longest frame time accepted from the host clock, in seconds
    pub max_frame_time: f64,
    /// Seed for each cartridge's RNG
    pub seed: u64,
    /// Directory holding one save directory per cartridge id
    pub save_root: PathBuf,
    /// Log records kept in memory
    pub log_capacity: usize,
    /// Interpreter operations per millisecond of a cartridge's CPU cap
    pub ops_per_ms: u64,
    pub limits: HostLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let host = HostOptions::default();
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            max_updates_per_frame: DEFAULT_MAX_UPDATES_PER_FRAME,
            max_frame_time: DEFAULT_MAX_FRAME_TIME,
            seed: DEFAULT_SEED,
            save_root: PathBuf::from("saves"),
            log_capacity: DEFAULT_LOG_CAPACITY,
            ops_per_ms: host.ops_per_ms,
            limits: HostLimits::default(),
        }
    }
}

impl RuntimeConfig {
    /// Read and check a RON config file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&text)
    }

    /// Parse and check a RON config
    ///
    /// # Example
    ///
    /// ```
    /// use tinbox_runtime::{ConfigError, RuntimeConfig};
    ///
    /// let err = RuntimeConfig::from_ron("(tick_hz: 0)").unwrap_err();
    /// assert!(matches!(err, ConfigError::Invalid { field: "tick_hz", .. }));
    ///
    /// let err = RuntimeConfig::from_ron("(tick_rate: 60)").unwrap_err();
    /// assert!(matches!(err, ConfigError::Parse(_)));
    /// ```
    pub fn from_ron(text: &str) -> ConfigResult<Self> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the runtime can run with these settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tick_hz == 0 || self.tick_hz > MAX_TICK_HZ {
            return Err(ConfigError::invalid(
                "tick_hz",
                format!("must be in 1..={}, got {}", MAX_TICK_HZ, self.tick_hz),
            ));
        }
        if self.max_updates_per_frame == 0 || self.max_updates_per_frame > MAX_UPDATES_PER_FRAME {
            return Err(ConfigError::invalid(
                "max_updates_per_frame",
                format!(
                    "must be in 1..={}, got {}",
                    MAX_UPDATES_PER_FRAME, self.max_updates_per_frame
                ),
            ));
        }
        if !self.max_frame_time.is_finite() || self.max_frame_time <= 0.0 {
            return Err(ConfigError::invalid(
                "max_frame_time",
                format!("must be a positive number of seconds, got {}", self.max_frame_time),
            ));
        }
        if self.max_frame_time < 1.0 / self.tick_hz as f64 {
            return Err(ConfigError::invalid(
                "max_frame_time",
                format!("must be at least one tick period (1/{} s)", self.tick_hz),
            ));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::invalid("log_capacity", "must be at least 1"));
        }
        if self.ops_per_ms == 0 {
            return Err(ConfigError::invalid("ops_per_ms", "must be at least 1"));
        }
        if self.save_root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("save_root", "must not be empty"));
        }
        for resource in Resource::ALL {
            let ceiling = self.limits.get(resource);
            if ceiling.hard == 0 || ceiling.soft > ceiling.hard {
                return Err(ConfigError::invalid(
                    "limits",
                    format!(
                        "{} needs 0 < soft <= hard, got soft {} hard {}",
                        resource, ceiling.soft, ceiling.hard
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Set the RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the save directory
    pub fn with_save_root(mut self, save_root: impl Into<PathBuf>) -> Self {
        self.save_root = save_root.into();
        self
    }

    /// Options handed to each cartridge's script host
    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            tick_hz: self.tick_hz,
            ops_per_ms: self.ops_per_ms,
            seed: self.seed,
        }
    }

    /// A fresh, idle scheduler for these settings
    pub fn scheduler(&self) -> TickScheduler {
        TickScheduler::new(self.tick_hz, self.max_updates_per_frame)
            .with_max_frame_time(self.max_frame_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinbox_core::Ceiling;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_frame_time, 0.25);
        assert_eq!(config.ops_per_ms, 10_000);
        assert_eq!(config.limits.vm_memory, Ceiling::new(48 << 20, 64 << 20));
        assert_eq!(config.limits.save_bytes.hard, 10 << 20);
        assert_eq!(config.limits.log_rate, Ceiling::new(100, 200));
    }

    #[test]
    fn test_partial_file() {
        let config = RuntimeConfig::from_ron(
            r#"(
                max_updates_per_frame: 8,
                save_root: "/tmp/saves",
                limits: (log_rate: (soft: 10, hard: 20)),
            )"#,
        )
        .unwrap();
        assert_eq!(config.max_updates_per_frame, 8);
        assert_eq!(config.save_root, PathBuf::from("/tmp/saves"));
        assert_eq!(config.limits.log_rate, Ceiling::new(10, 20));
        // Untouched ceilings keep their defaults
        assert_eq!(config.limits.vm_memory, HostLimits::default().vm_memory);
        assert_eq!(config.tick_hz, 60);
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            ("(tick_hz: 5000)", "tick_hz"),
            ("(max_updates_per_frame: 0)", "max_updates_per_frame"),
            ("(max_frame_time: -1.0)", "max_frame_time"),
            ("(tick_hz: 2, max_frame_time: 0.25)", "max_frame_time"),
            ("(log_capacity: 0)", "log_capacity"),
            ("(ops_per_ms: 0)", "ops_per_ms"),
            (r#"(save_root: "")"#, "save_root"),
            ("(limits: (file_size: (soft: 10, hard: 5)))", "limits"),
            ("(limits: (asset_bytes: (soft: 0, hard: 0)))", "limits"),
        ];
        for (text, expected) in cases {
            match RuntimeConfig::from_ron(text) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected, "{}", text),
                other => panic!("{} should be rejected, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load(dir.path().join("tinbox.ron")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        let status: tinbox_core::Status = err.into();
        assert_eq!(status.kind(), tinbox_core::ErrorKind::NotFound);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tinbox.ron");
        std::fs::write(&path, "(tick_hz: 120, max_frame_time: 0.1)").unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.tick_hz, 120);

        let scheduler = config.scheduler();
        assert_eq!(scheduler.max_updates_per_frame(), 4);
        assert_eq!(scheduler.tick_state().period(), 1.0 / 120.0);
    }

    #[test]
    fn test_host_options() {
        let config = RuntimeConfig::default().with_seed(99);
        let options = config.host_options();
        assert_eq!(options.seed, 99);
        assert_eq!(options.tick_hz, 60);
        assert_eq!(options.ops_per_ms, 10_000);
    }
}
