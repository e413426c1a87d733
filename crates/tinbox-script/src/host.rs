//! Script host: owns the single VM slot for one cartridge

use crate::commands::FrameCommands;
use crate::manifest::{Caps, CartridgeManifest};
use crate::program::Program;
use crate::vm::{HostEnv, ScriptVm};
use serde::{Deserialize, Serialize};
use tinbox_core::{ErrorKind, LogContext, Result, SharedBudget, Status, DEFAULT_SEED};

/// `init` gets this many times the per-update operation budget
pub const INIT_OPS_MULTIPLIER: u64 = 10;

/// Host-side settings for running scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostOptions {
    pub tick_hz: u32,
    /// Interpreter operations granted per millisecond of `cpu_ms_per_update`
    pub ops_per_ms: u64,
    pub seed: u64,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            ops_per_ms: 10_000,
            seed: DEFAULT_SEED,
        }
    }
}

impl HostOptions {
    /// Operations allowed per update for a cartridge's caps (at least 1)
    pub fn ops_per_update(&self, caps: &Caps) -> u64 {
        ((caps.cpu_ms_per_update * self.ops_per_ms as f64) as u64).max(1)
    }

    pub fn ops_per_init(&self, ops_per_update: u64) -> u64 {
        ops_per_update.saturating_mul(INIT_OPS_MULTIPLIER)
    }
}

/// Runs one cartridge's script
///
/// At most one [`ScriptVm`] is live at a time. Reloading drops the old VM
/// (releasing its memory) before the new one is built; a VM is only placed
/// in the slot after its `init` block succeeded.
#[derive(Debug)]
pub struct ScriptHost {
    manifest: CartridgeManifest,
    budget: SharedBudget,
    log: LogContext,
    options: HostOptions,
    vm: Option<ScriptVm>,
}

impl ScriptHost {
    /// Create a host for a validated manifest; no VM exists yet
    pub fn start(
        manifest: CartridgeManifest,
        budget: SharedBudget,
        log: LogContext,
        options: HostOptions,
    ) -> Result<Self> {
        if options.tick_hz == 0 {
            return Err(Status::invalid_argument("tick_hz must be greater than zero"));
        }
        let log = log.for_cartridge(&manifest.id);
        Ok(Self {
            manifest,
            budget,
            log,
            options,
            vm: None,
        })
    }

    /// Load the entry file and run its `init` block
    pub fn run_entry(&mut self, env: &mut HostEnv<'_>) -> Result<()> {
        if self.vm.is_some() {
            return Err(Status::failed_precondition("entry already ran; use hot_reload"));
        }
        let vm = self.build(env)?;
        self.log.info(format!(
            "{} {} started from {}",
            self.manifest.title, self.manifest.version, self.manifest.entry
        ));
        self.vm = Some(vm);
        Ok(())
    }

    /// Run one fixed update; without a live VM this is fatal
    pub fn update(&mut self, dt: f64, env: &mut HostEnv<'_>) -> Result<()> {
        let Some(vm) = self.vm.as_mut() else {
            return Err(Status::fatal(
                ErrorKind::FailedPrecondition,
                "update called with no live VM",
            ));
        };
        vm.update(dt, env)
    }

    /// Throw the VM away and start over from a fresh read of the entry file
    pub fn hot_reload(&mut self, env: &mut HostEnv<'_>) -> Result<()> {
        self.vm = None;
        let vm = self.build(env)?;
        self.log.info("hot reload complete");
        self.vm = Some(vm);
        Ok(())
    }

    fn build(&self, env: &mut HostEnv<'_>) -> Result<ScriptVm> {
        let program = Program::load(env.namespace, &self.manifest.entry)?;
        let mut vm = ScriptVm::new(
            program,
            self.manifest.clone(),
            self.budget.clone(),
            self.log.clone(),
            &self.options,
        )?;
        vm.run_init(env)?;
        Ok(vm)
    }

    pub fn manifest(&self) -> &CartridgeManifest {
        &self.manifest
    }

    pub fn vm(&self) -> Option<&ScriptVm> {
        self.vm.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.vm.is_some()
    }

    pub fn state_hash(&self) -> Option<u64> {
        self.vm.as_ref().map(ScriptVm::state_hash)
    }

    /// Take the commands queued since the last call
    pub fn take_commands(&mut self) -> FrameCommands {
        self.vm
            .as_mut()
            .map(ScriptVm::take_commands)
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.vm.as_ref().and_then(ScriptVm::last_error)
    }

    pub fn exit_requested(&self) -> bool {
        self.vm.as_ref().is_some_and(ScriptVm::exit_requested)
    }
}
