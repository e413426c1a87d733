//! VM memory accounting
//!
//! The VM holds a fixed base footprint plus the estimated size of every
//! global. Writes charge the growth before they are committed, so a write
//! that would cross the hard ceiling fails and leaves the global untouched.

use tinbox_core::{LogContext, Resource, Result, SharedBudget, Value};

/// Bytes charged for an empty VM
pub const VM_BASE_BYTES: u64 = 64 * 1024;

/// Estimated bytes held by one global
pub fn entry_footprint(name: &str, value: &Value) -> u64 {
    name.len() as u64 + value.footprint()
}

/// Tracks the VM's share of [`Resource::VmMemory`]
///
/// Dropping the meter releases everything it holds.
#[derive(Debug)]
pub struct MemoryMeter {
    budget: SharedBudget,
    log: LogContext,
    held: u64,
    warned: bool,
}

impl MemoryMeter {
    /// Charge the base footprint; failing here is fatal for the session
    pub fn new(budget: SharedBudget, log: LogContext) -> Result<Self> {
        let charge = budget
            .borrow_mut()
            .charge(Resource::VmMemory, VM_BASE_BYTES)
            .map_err(|status| status.context("cannot create VM").into_fatal())?;
        let mut meter = Self {
            budget,
            log,
            held: VM_BASE_BYTES,
            warned: false,
        };
        if charge.is_over_soft() {
            meter.warn_once();
        }
        Ok(meter)
    }

    /// Bytes currently held
    pub fn held(&self) -> u64 {
        self.held
    }

    /// Bytes the VM may still allocate before the hard ceiling
    pub fn headroom(&self) -> u64 {
        self.budget.borrow().remaining(Resource::VmMemory)
    }

    /// Account for an entry changing size from `old` to `new` bytes
    pub fn resize(&mut self, old: u64, new: u64) -> Result<()> {
        if new > old {
            let charge = self
                .budget
                .borrow_mut()
                .charge(Resource::VmMemory, new - old)?;
            self.held += new - old;
            if charge.is_over_soft() {
                self.warn_once();
            }
        } else {
            let freed = (old - new).min(self.held);
            self.budget.borrow_mut().release(Resource::VmMemory, freed);
            self.held -= freed;
        }
        Ok(())
    }

    /// Return to a previously observed footprint (failed update rollback)
    pub fn restore(&mut self, held: u64) {
        let mut budget = self.budget.borrow_mut();
        budget.release(Resource::VmMemory, self.held);
        // `held` fit before the update, and nothing else charges VM memory
        if let Err(status) = budget.charge(Resource::VmMemory, held) {
            tracing::warn!(%status, "could not restore VM memory footprint");
            return;
        }
        self.held = held;
    }

    fn warn_once(&mut self) {
        if !self.warned {
            self.warned = true;
            self.log.warn(format!(
                "VM memory above soft limit ({} bytes held)",
                self.held
            ));
        }
    }
}

impl Drop for MemoryMeter {
    fn drop(&mut self) {
        self.budget
            .borrow_mut()
            .release(Resource::VmMemory, self.held);
    }
}
