//! Tinbox Core - Shared building blocks for the cartridge runtime
//!
//! This crate provides the pieces every other tinbox crate depends on:
//! - Status channel (`Status`, `ErrorKind`, `Result`)
//! - Dynamic value types (`Value`, `ValueMap`)
//! - Deterministic RNG (`SimRng`) and state hashing
//! - Resource budgets with soft/hard ceilings (`ResourceBudget`)
//! - Fixed-step tick scheduling (`TickScheduler`)
//! - Frozen input snapshots with record/playback
//! - Logging context with a bounded record ring
//!
//! Everything here is single-threaded by design: shared handles are
//! `Rc<RefCell<_>>` and stay on the thread that owns the cartridge.

pub mod budget;
pub mod hash;
pub mod input;
pub mod log;
mod rng;
mod status;
pub mod time;
mod value;

pub use budget::{
    BudgetLimits, Ceiling, Charge, Resource, ResourceBudget, ResourceHints, SharedBudget,
    UsageSnapshot,
};
pub use indexmap::IndexMap;
pub use input::{InputPlayback, InputRecorder, InputRecording, InputSnapshot, InputSource};
pub use log::{LogContext, LogLevel, LogRecord, LogRing};
pub use rng::{splitmix64, SimRng, DEFAULT_SEED};
pub use status::{ErrorKind, Result, Status};
pub use time::{FrameReport, SchedulerState, Tick, TickScheduler, TickState};
pub use value::{Value, ValueMap};
