//! The script VM
//!
//! One [`ScriptVm`] interprets one cartridge program. Every `init`/`update`
//! call is a transaction: globals, RNG, last error, handles, queued commands
//! and the VM memory counter are checkpointed first and restored if the call
//! fails, so a faulted tick leaves nothing half-applied.
//!
//! Namespace side effects (save writes, asset charges) are not rolled back.

use crate::bindings::CallEnv;
use crate::commands::{CommandBuffer, CommandMark, FrameCommands};
use crate::effect::{execute_all, ExecContext};
use crate::expr::OpMeter;
use crate::handles::HandleTables;
use crate::host::HostOptions;
use crate::manifest::CartridgeManifest;
use crate::memory::MemoryMeter;
use crate::program::Program;
use tinbox_core::hash::{StateHasher, DEFAULT_HASH_SEED};
use tinbox_core::{
    InputSnapshot, LogContext, LogLevel, Resource, Result, SharedBudget, SimRng, Status, Tick,
    Value, ValueMap,
};
use tinbox_vfs::Namespace;

/// What a call into the VM may touch on the host side
pub struct HostEnv<'a> {
    pub namespace: &'a mut Namespace,
    /// Input frozen for this tick
    pub input: &'a InputSnapshot,
    pub tick: Tick,
}

/// Mutable VM state reachable from bindings
#[derive(Debug, Clone)]
pub struct VmState {
    pub(crate) rng: SimRng,
    pub(crate) handles: HandleTables,
    pub(crate) commands: CommandBuffer,
    pub(crate) last_error: Option<String>,
    pub(crate) tick: Tick,
    pub(crate) dt: f64,
    pub(crate) exit_requested: bool,
    /// Input seen by the previous update, for edge detection
    pub(crate) prev_input: InputSnapshot,
    pub(crate) log_window_start: Tick,
    pub(crate) log_warned: bool,
}

impl VmState {
    pub fn new(seed: u64, max_draw_calls: usize, dt: f64) -> Self {
        Self {
            rng: SimRng::new(seed),
            handles: HandleTables::new(),
            commands: CommandBuffer::new(max_draw_calls),
            last_error: None,
            tick: 0,
            dt,
            exit_requested: false,
            prev_input: InputSnapshot::idle(),
            log_window_start: 0,
            log_warned: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Init,
    Update,
}

impl Block {
    fn as_str(self) -> &'static str {
        match self {
            Block::Init => "init",
            Block::Update => "update",
        }
    }
}

/// Everything restored when a call fails
struct Checkpoint {
    globals: ValueMap,
    rng: SimRng,
    last_error: Option<String>,
    handles: HandleTables,
    commands: CommandMark,
    memory: u64,
    exit_requested: bool,
}

/// A live script VM
#[derive(Debug)]
pub struct ScriptVm {
    program: Program,
    manifest: CartridgeManifest,
    globals: ValueMap,
    state: VmState,
    memory: MemoryMeter,
    budget: SharedBudget,
    log: LogContext,
    tick_hz: u32,
    ops_per_update: u64,
    ops_per_init: u64,
    initialized: bool,
}

impl ScriptVm {
    /// Build a VM for `program`, charging its base memory
    pub fn new(
        program: Program,
        manifest: CartridgeManifest,
        budget: SharedBudget,
        log: LogContext,
        options: &HostOptions,
    ) -> Result<Self> {
        let memory = MemoryMeter::new(budget.clone(), log.clone())?;
        budget.borrow_mut().reset(Resource::LogRate);
        let ops_per_update = options.ops_per_update(&manifest.caps);
        let state = VmState::new(
            options.seed,
            manifest.caps.max_draw_calls as usize,
            1.0 / options.tick_hz as f64,
        );
        Ok(Self {
            program,
            manifest,
            globals: ValueMap::new(),
            state,
            memory,
            budget,
            log,
            tick_hz: options.tick_hz,
            ops_per_update,
            ops_per_init: options.ops_per_init(ops_per_update),
            initialized: false,
        })
    }

    /// Run the program's `init` block; only allowed once
    pub fn run_init(&mut self, env: &mut HostEnv<'_>) -> Result<()> {
        if self.initialized {
            return Err(Status::failed_precondition("init already ran"));
        }
        self.state.tick = env.tick;
        let mut params = ValueMap::new();
        params.insert("tick".to_string(), Value::Int(env.tick as i64));
        let result = self.run_block(Block::Init, &params, self.ops_per_init, env);
        self.initialized = result.is_ok();
        result
    }

    /// Run the `update` block for one fixed tick
    pub fn update(&mut self, dt: f64, env: &mut HostEnv<'_>) -> Result<()> {
        if !self.initialized {
            return Err(Status::failed_precondition("update before init"));
        }
        self.state.tick = env.tick;
        self.state.dt = dt;
        self.roll_log_window(env.tick);

        let mut params = ValueMap::new();
        params.insert("tick".to_string(), Value::Int(env.tick as i64));
        params.insert("dt".to_string(), Value::Float(dt));
        let result = self.run_block(Block::Update, &params, self.ops_per_update, env);
        self.state.prev_input = *env.input;
        result
    }

    fn roll_log_window(&mut self, tick: Tick) {
        if tick.saturating_sub(self.state.log_window_start) >= self.tick_hz as u64 {
            self.budget.borrow_mut().reset(Resource::LogRate);
            self.state.log_window_start = tick;
            self.state.log_warned = false;
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            globals: self.globals.clone(),
            rng: self.state.rng.clone(),
            last_error: self.state.last_error.clone(),
            handles: self.state.handles.clone(),
            commands: self.state.commands.mark(),
            memory: self.memory.held(),
            exit_requested: self.state.exit_requested,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.globals = checkpoint.globals;
        self.state.rng = checkpoint.rng;
        self.state.last_error = checkpoint.last_error;
        self.state.handles = checkpoint.handles;
        self.state.commands.rollback(checkpoint.commands);
        self.state.exit_requested = checkpoint.exit_requested;
        self.memory.restore(checkpoint.memory);
    }

    fn run_block(
        &mut self,
        block: Block,
        params: &ValueMap,
        ops: u64,
        env: &mut HostEnv<'_>,
    ) -> Result<()> {
        let checkpoint = self.checkpoint();
        let mut meter = OpMeter::new(ops);
        let effects = match block {
            Block::Init => &self.program.init,
            Block::Update => &self.program.update,
        };

        let result = {
            let mut natives = CallEnv {
                state: &mut self.state,
                namespace: &mut *env.namespace,
                input: env.input,
                manifest: &self.manifest,
                log: &self.log,
                budget: &self.budget,
            };
            let mut ctx = ExecContext {
                globals: &mut self.globals,
                params,
                meter: &mut meter,
                natives: &mut natives,
                memory: &mut self.memory,
            };
            execute_all(effects, &mut ctx)
        };

        if let Err(status) = result {
            self.restore(checkpoint);
            let status = status.context(format_args!("{} at tick {}", block.as_str(), env.tick));
            self.log
                .log(LogLevel::Error, Some(env.tick), status.to_string());
            self.state.last_error = Some(status.to_string());
            return Err(status);
        }
        tracing::trace!(
            cartridge = %self.manifest.id,
            tick = env.tick,
            ops = meter.used(),
            block = block.as_str(),
            "script call finished"
        );
        Ok(())
    }

    /// Hash of the simulation state: tick, RNG and globals (by sorted key)
    pub fn state_hash(&self) -> u64 {
        let mut hasher = StateHasher::new(DEFAULT_HASH_SEED);
        hasher.write_u64(self.state.tick);
        let [s0, s1] = self.state.rng.state();
        hasher.write_u64(s0).write_u64(s1);
        let mut keys: Vec<&String> = self.globals.keys().collect();
        keys.sort();
        hasher.write_u64(keys.len() as u64);
        for key in keys {
            hasher.write_str(key).write_value(&self.globals[key.as_str()]);
        }
        hasher.finish()
    }

    pub fn globals(&self) -> &ValueMap {
        &self.globals
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn handles(&self) -> &HandleTables {
        &self.state.handles
    }

    /// Take the commands queued since the last call
    pub fn take_commands(&mut self) -> FrameCommands {
        self.state.commands.drain()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.state.last_error.as_deref()
    }

    /// Check if the script called `sys.exit()`
    pub fn exit_requested(&self) -> bool {
        self.state.exit_requested
    }

    /// VM memory currently charged
    pub fn memory_held(&self) -> u64 {
        self.memory.held()
    }

    pub fn ops_per_update(&self) -> u64 {
        self.ops_per_update
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
