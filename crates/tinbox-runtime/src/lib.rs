//! Tinbox Runtime - Load, run and unload sandboxed cartridges
//!
//! This crate composes the other tinbox crates into the one component host
//! code talks to.
//!
//! ## Architecture
//!
//! ```text
//! Runtime (owns the session)
//!  │
//!  ├── CartridgeManifest ← validated before anything is mounted
//!  ├── Namespace         ← cart:/ and save:/ under the budget
//!  ├── ScriptHost        ← one live VM, rebuilt whole on reload
//!  │    └── ScriptVm ──► bindings ──► Namespace, commands
//!  └── TickScheduler     ← fixed updates, one frozen input each
//! ```
//!
//! ## Key Components
//!
//! - [`Runtime`]: load → frame/tick → shutdown, with fault handling
//! - [`RuntimeConfig`]: host-wide settings read from RON
//! - [`logging`]: `tracing-subscriber` setup for binaries
//!
//! ## Design Principles
//!
//! 1. **One thread owns a cartridge** - budgets and logs are `Rc`, not `Arc`
//! 2. **Sessions are all or nothing** - a failed load leaves no cartridge
//! 3. **Faults end the session, not the host** - the reason stays readable

mod config;
mod error;
pub mod logging;
mod orchestrator;

pub use config::{HostLimits, RuntimeConfig, MAX_TICK_HZ, MAX_UPDATES_PER_FRAME};
pub use error::{ConfigError, ConfigResult};
pub use orchestrator::{Runtime, DEFAULT_RECORDING_CAPACITY, MAX_MANIFEST_BYTES, MAX_PENDING_AUDIO};
