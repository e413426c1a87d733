//! Resource budget tracking
//!
//! Every tracked resource has a soft and a hard ceiling. Crossing the soft
//! ceiling succeeds but is reported so the caller can warn; an operation that
//! would cross the hard ceiling is refused before anything is committed.
//!
//! Usage counters are mutated only by the thread that owns the cartridge.
//! [`SharedBudget`] is an `Rc<RefCell<_>>` and cannot leave that thread.

use crate::{Result, Status};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

const MIB: u64 = 1024 * 1024;

/// A tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    /// Bytes held by the script VM
    VmMemory,
    /// Size of a single file read or written (per item, no running total)
    FileSize,
    /// Total bytes of cartridge assets loaded so far
    AssetBytes,
    /// Total bytes stored in the save namespace
    SaveBytes,
    /// Log messages in the current one-second window
    LogRate,
}

impl Resource {
    /// All resources, in counter order
    pub const ALL: [Resource; 5] = [
        Resource::VmMemory,
        Resource::FileSize,
        Resource::AssetBytes,
        Resource::SaveBytes,
        Resource::LogRate,
    ];

    fn index(self) -> usize {
        match self {
            Resource::VmMemory => 0,
            Resource::FileSize => 1,
            Resource::AssetBytes => 2,
            Resource::SaveBytes => 3,
            Resource::LogRate => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::VmMemory => "vm_memory",
            Resource::FileSize => "file_size",
            Resource::AssetBytes => "asset_bytes",
            Resource::SaveBytes => "save_bytes",
            Resource::LogRate => "log_rate",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A soft/hard ceiling pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ceiling {
    pub soft: u64,
    pub hard: u64,
}

impl Ceiling {
    /// Create a ceiling; `soft` is clamped to `hard`
    pub fn new(soft: u64, hard: u64) -> Self {
        Self {
            soft: soft.min(hard),
            hard,
        }
    }

    /// Lower this ceiling to `hard`, keeping the soft/hard ratio
    pub fn lowered_to(self, hard: u64) -> Self {
        if hard >= self.hard {
            return self;
        }
        let soft = if self.hard == 0 {
            0
        } else {
            ((self.soft as u128 * hard as u128) / self.hard as u128) as u64
        };
        Self::new(soft, hard)
    }
}

/// Outcome of a successful charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    /// Usage is at or below the soft ceiling
    Within,
    /// Usage is above the soft ceiling but within the hard one
    OverSoft,
}

impl Charge {
    pub fn is_over_soft(self) -> bool {
        matches!(self, Charge::OverSoft)
    }
}

/// Host-wide ceilings for every resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    pub vm_memory: Ceiling,
    pub file_size: Ceiling,
    pub asset_bytes: Ceiling,
    pub save_bytes: Ceiling,
    pub log_rate: Ceiling,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            vm_memory: Ceiling::new(48 * MIB, 64 * MIB),
            file_size: Ceiling::new(8 * MIB, 16 * MIB),
            asset_bytes: Ceiling::new(192 * MIB, 256 * MIB),
            save_bytes: Ceiling::new(8 * MIB, 10 * MIB),
            log_rate: Ceiling::new(100, 200),
        }
    }
}

impl BudgetLimits {
    /// Get the ceiling for a resource
    pub fn get(&self, resource: Resource) -> Ceiling {
        match resource {
            Resource::VmMemory => self.vm_memory,
            Resource::FileSize => self.file_size,
            Resource::AssetBytes => self.asset_bytes,
            Resource::SaveBytes => self.save_bytes,
            Resource::LogRate => self.log_rate,
        }
    }

    fn get_mut(&mut self, resource: Resource) -> &mut Ceiling {
        match resource {
            Resource::VmMemory => &mut self.vm_memory,
            Resource::FileSize => &mut self.file_size,
            Resource::AssetBytes => &mut self.asset_bytes,
            Resource::SaveBytes => &mut self.save_bytes,
            Resource::LogRate => &mut self.log_rate,
        }
    }

    /// Apply cartridge hints on top of these limits
    ///
    /// Hints can only lower a ceiling; the host limits stay authoritative.
    ///
    /// # Example
    ///
    /// ```
    /// use tinbox_core::{BudgetLimits, Resource, ResourceHints};
    ///
    /// let host = BudgetLimits::default();
    /// let hints = ResourceHints {
    ///     vm_memory: Some(1024),
    ///     save_bytes: Some(u64::MAX),
    ///     ..Default::default()
    /// };
    /// let merged = host.merged_with(&hints);
    /// assert_eq!(merged.get(Resource::VmMemory).hard, 1024);
    /// assert_eq!(merged.get(Resource::SaveBytes), host.get(Resource::SaveBytes));
    /// ```
    pub fn merged_with(&self, hints: &ResourceHints) -> BudgetLimits {
        let mut merged = self.clone();
        for resource in Resource::ALL {
            if let Some(hard) = hints.get(resource) {
                let ceiling = merged.get_mut(resource);
                *ceiling = ceiling.lowered_to(hard);
            }
        }
        merged
    }
}

/// Hard-ceiling hints declared by a cartridge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHints {
    pub vm_memory: Option<u64>,
    pub file_size: Option<u64>,
    pub asset_bytes: Option<u64>,
    pub save_bytes: Option<u64>,
    pub log_rate: Option<u64>,
}

impl ResourceHints {
    pub fn get(&self, resource: Resource) -> Option<u64> {
        match resource {
            Resource::VmMemory => self.vm_memory,
            Resource::FileSize => self.file_size,
            Resource::AssetBytes => self.asset_bytes,
            Resource::SaveBytes => self.save_bytes,
            Resource::LogRate => self.log_rate,
        }
    }
}

/// Copy of every usage counter, for comparisons in tests and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot([u64; 5]);

impl UsageSnapshot {
    pub fn get(&self, resource: Resource) -> u64 {
        self.0[resource.index()]
    }
}

/// Live usage against a set of ceilings
#[derive(Debug, Clone)]
pub struct ResourceBudget {
    limits: BudgetLimits,
    usage: [u64; 5],
}

/// A budget shared by the namespace and the script host of one cartridge
pub type SharedBudget = Rc<RefCell<ResourceBudget>>;

impl ResourceBudget {
    /// Create a budget with zero usage
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            usage: [0; 5],
        }
    }

    /// Wrap this budget for sharing within the owning thread
    pub fn into_shared(self) -> SharedBudget {
        Rc::new(RefCell::new(self))
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn ceiling(&self, resource: Resource) -> Ceiling {
        self.limits.get(resource)
    }

    pub fn usage(&self, resource: Resource) -> u64 {
        self.usage[resource.index()]
    }

    /// Room left below the hard ceiling
    pub fn remaining(&self, resource: Resource) -> u64 {
        self.ceiling(resource)
            .hard
            .saturating_sub(self.usage(resource))
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot(self.usage)
    }

    /// Check whether `amount` more would fit, without charging it
    pub fn check(&self, resource: Resource, amount: u64) -> Result<Charge> {
        let ceiling = self.ceiling(resource);
        let current = self.usage(resource);
        let next = current.checked_add(amount).unwrap_or(u64::MAX);
        if next > ceiling.hard {
            return Err(Status::resource_exhausted(format!(
                "{}: {} + {} exceeds hard limit {}",
                resource, current, amount, ceiling.hard
            )));
        }
        Ok(if next > ceiling.soft {
            Charge::OverSoft
        } else {
            Charge::Within
        })
    }

    /// Check a single item against a ceiling, ignoring running usage
    ///
    /// Used for per-item limits such as [`Resource::FileSize`].
    pub fn check_item(&self, resource: Resource, size: u64) -> Result<Charge> {
        let ceiling = self.ceiling(resource);
        if size > ceiling.hard {
            return Err(Status::resource_exhausted(format!(
                "{}: {} exceeds hard limit {}",
                resource, size, ceiling.hard
            )));
        }
        Ok(if size > ceiling.soft {
            Charge::OverSoft
        } else {
            Charge::Within
        })
    }

    /// Charge `amount`, or fail without changing anything
    pub fn charge(&mut self, resource: Resource, amount: u64) -> Result<Charge> {
        let charge = self.check(resource, amount)?;
        self.usage[resource.index()] += amount;
        Ok(charge)
    }

    /// Give back `amount` (saturating at zero)
    pub fn release(&mut self, resource: Resource, amount: u64) {
        let slot = &mut self.usage[resource.index()];
        *slot = slot.saturating_sub(amount);
    }

    /// Set a counter to an absolute value
    ///
    /// Fails without change if `usage` is above the hard ceiling.
    pub fn rebase(&mut self, resource: Resource, usage: u64) -> Result<Charge> {
        let ceiling = self.ceiling(resource);
        if usage > ceiling.hard {
            return Err(Status::resource_exhausted(format!(
                "{}: {} exceeds hard limit {}",
                resource, usage, ceiling.hard
            )));
        }
        self.usage[resource.index()] = usage;
        Ok(if usage > ceiling.soft {
            Charge::OverSoft
        } else {
            Charge::Within
        })
    }

    /// Reset a counter to zero (e.g. at the start of a log-rate window)
    pub fn reset(&mut self, resource: Resource) {
        self.usage[resource.index()] = 0;
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self::new(BudgetLimits::default())
    }
}
