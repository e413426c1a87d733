//! Tinbox Script - Cartridge manifests and the script VM
//!
//! - Manifest validation with stable rejection codes (`CartridgeManifest`)
//! - A RON program of expressions and effects (`Program`, `Expr`, `Effect`)
//! - The native-call boundary: validated bindings for `sys`, `fs`, `inp`,
//!   `gfx` and `audio`
//! - `ScriptHost`, owning the single live VM of a cartridge
//!
//! # Example
//!
//! ```
//! use tinbox_script::{CartridgeManifest, Program};
//!
//! let manifest = CartridgeManifest::validate(
//!     br#"
//! id = "pong"
//! title = "Pong"
//! version = "1.0.0"
//! api_version = "0.1"
//! entry = "cart:/main.ron"
//! "#,
//! )
//! .unwrap();
//! assert_eq!(manifest.entry.to_string(), "cart:/main.ron");
//!
//! let program = Program::parse(
//!     "cart:/main.ron",
//!     r#"Program(update: [Call("gfx.clear", [Literal(Int(255))])])"#,
//! )
//! .unwrap();
//! assert_eq!(program.update.len(), 1);
//! ```

pub mod bindings;
pub mod commands;
mod effect;
mod error;
mod expr;
pub mod handles;
mod host;
pub mod manifest;
mod memory;
mod program;
mod vm;

pub use commands::{AudioCommand, DrawCommand, FrameCommands};
pub use effect::{Effect, ModifyOp};
pub use error::{ManifestError, Result, ScriptError};
pub use expr::{Expr, NativeCall, OpMeter, MAX_STRING_BYTES};
pub use handles::HandleKind;
pub use host::{HostOptions, ScriptHost, INIT_OPS_MULTIPLIER};
pub use manifest::{CartridgeManifest, MANIFEST_FILE, SUPPORTED_API_VERSION};
pub use memory::VM_BASE_BYTES;
pub use program::Program;
pub use vm::{HostEnv, ScriptVm, VmState};
