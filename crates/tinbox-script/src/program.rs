//! RON script loader
//!
//! A cartridge's entry file is a RON document with two effect blocks:
//!
//! ```ron
//! Program(
//!     init: [
//!         SetGlobal(name: "x", value: Literal(Int(0))),
//!     ],
//!     update: [
//!         ModifyGlobal(name: "x", op: Add, value: Literal(Int(1))),
//!     ],
//! )
//! ```

use crate::effect::Effect;
use crate::error::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use tinbox_vfs::{Namespace, VirtualPath};

/// A loaded cartridge program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Program {
    /// Run once when the entry is first executed (and after every reload)
    pub init: Vec<Effect>,
    /// Run once per fixed tick
    pub update: Vec<Effect>,
}

impl Program {
    /// Parse a program from RON text; `origin` only labels errors
    pub fn parse(origin: &str, content: &str) -> Result<Self> {
        ron::from_str(content).map_err(|source| ScriptError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Read and parse the entry file through the cartridge namespace
    pub fn load(namespace: &mut Namespace, entry: &VirtualPath) -> Result<Self> {
        let origin = entry.to_string();
        let content = namespace.read_text(&origin)?;
        Self::parse(&origin, &content)
    }

    /// Check if the update block does anything
    pub fn has_update(&self) -> bool {
        !self.update.is_empty()
    }
}
