//! Runtime - Loads, runs and unloads one cartridge at a time
//!
//! The runtime owns everything a loaded cartridge touches: its manifest, its
//! namespace, its resource budget, its script host and its scheduler. They
//! live together in a session that is built completely or not at all, and
//! torn down as one.
//!
//! ## Lifecycle
//!
//! ```text
//! no cartridge ──load_cartridge──► running ──sys.exit──► stopped
//!      ▲                              │                     │
//!      └──── fault / shutdown ────────┴─────── shutdown ────┘
//! ```
//!
//! A load that fails at any step, a fatal update, or a failed hot reload all
//! return the runtime to "no cartridge" and keep the reason as the
//! [`diagnostic`](Runtime::diagnostic).

use crate::config::RuntimeConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tinbox_core::input::IdleInput;
use tinbox_core::{
    FrameReport, InputRecorder, InputRecording, InputSnapshot, InputSource, LogContext, LogLevel,
    LogRing, ResourceBudget, Result, SchedulerState, SharedBudget, Status, Tick, TickScheduler,
    UsageSnapshot,
};
use tinbox_script::{CartridgeManifest, FrameCommands, HostEnv, ScriptHost, MANIFEST_FILE};
use tinbox_vfs::{MountPolicy, MountRoots, Namespace};

/// Largest manifest file the runtime will read
pub const MAX_MANIFEST_BYTES: u64 = 64 * 1024;

/// Frames kept by a recording when the caller does not choose
pub const DEFAULT_RECORDING_CAPACITY: usize = 60 * 60 * 10;

/// Audio commands kept between drains
pub const MAX_PENDING_AUDIO: usize = 4096;

/// Everything owned by a loaded cartridge
struct Session {
    host: ScriptHost,
    namespace: Namespace,
    scheduler: TickScheduler,
    budget: SharedBudget,
    cart_root: PathBuf,
    /// Commands collected from finished frames, waiting for the caller
    pending: FrameCommands,
}

/// Central coordinator for a single cartridge
///
/// # Example
///
/// ```
/// use tinbox_runtime::{Runtime, RuntimeConfig};
///
/// let cart = tempfile::tempdir().unwrap();
/// let saves = tempfile::tempdir().unwrap();
/// std::fs::write(
///     cart.path().join("cartridge.toml"),
///     "id = \"hello\"\ntitle = \"Hello\"\nversion = \"1\"\n\
///      api_version = \"0.1\"\nentry = \"main.ron\"\n",
/// )
/// .unwrap();
/// std::fs::write(
///     cart.path().join("main.ron"),
///     "Program(update: [ModifyGlobal(name: \"n\", op: Add, value: Literal(Int(1)))])",
/// )
/// .unwrap();
///
/// let config = RuntimeConfig::default().with_save_root(saves.path());
/// let mut runtime = Runtime::new(config).unwrap();
/// runtime.load_cartridge(cart.path()).unwrap();
///
/// assert_eq!(runtime.run_ticks(3).unwrap(), 3);
/// assert_eq!(runtime.current_tick(), Some(3));
///
/// runtime.shutdown();
/// assert!(!runtime.is_loaded());
/// ```
pub struct Runtime {
    config: RuntimeConfig,
    log: LogContext,
    input: InputRecorder<Box<dyn InputSource>>,
    session: Option<Session>,
    diagnostic: Option<Status>,
}

impl Runtime {
    /// Create a runtime with its own log ring
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let log = LogContext::new(LogRing::new(config.log_capacity));
        Self::with_log(config, log)
    }

    /// Create a runtime writing into an existing log context
    pub fn with_log(config: RuntimeConfig, log: LogContext) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            log: log.host(),
            input: InputRecorder::new(Box::new(IdleInput)),
            session: None,
            diagnostic: None,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load the cartridge in `path`, replacing any loaded one
    ///
    /// The manifest is validated before anything is mounted. On failure the
    /// runtime holds no cartridge and the reason is kept as the diagnostic.
    pub fn load_cartridge(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.shutdown();
        self.diagnostic = None;

        match self.open_session(path) {
            Ok(session) => {
                let manifest = session.host.manifest();
                self.log.for_cartridge(&manifest.id).info(format!(
                    "loaded \"{}\" {} from {}",
                    manifest.title,
                    manifest.version,
                    path.display()
                ));
                self.session = Some(session);
                Ok(())
            }
            Err(status) => {
                let status = status.context(format!("cannot load {}", path.display()));
                self.log.error(status.to_string());
                self.diagnostic = Some(status.clone());
                Err(status)
            }
        }
    }

    fn open_session(&self, cart_root: &Path) -> Result<Session> {
        let manifest = read_manifest(cart_root)?;

        let mut scheduler = self.config.scheduler();
        scheduler.start()?;

        let limits = self.config.limits.merged_with(&manifest.resource_hints());
        let budget = ResourceBudget::new(limits).into_shared();
        let roots = MountRoots::for_cartridge(cart_root, &self.config.save_root, &manifest.id);
        let policy = MountPolicy {
            save_enabled: manifest.permissions.save_storage,
        };
        let mut namespace = Namespace::mount(roots, policy, budget.clone())?;

        let host = ScriptHost::start(
            manifest,
            budget.clone(),
            self.log.clone(),
            self.config.host_options(),
        )
        .and_then(|mut host| {
            let idle = InputSnapshot::idle();
            let mut env = HostEnv {
                namespace: &mut namespace,
                input: &idle,
                tick: 0,
            };
            host.run_entry(&mut env)?;
            Ok(host)
        });
        let host = match host {
            Ok(host) => host,
            Err(status) => {
                namespace.unmount();
                return Err(status);
            }
        };

        Ok(Session {
            host,
            namespace,
            scheduler,
            budget,
            cart_root: cart_root.to_path_buf(),
            pending: FrameCommands::default(),
        })
    }

    /// Unload the cartridge, if any
    pub fn shutdown(&mut self) {
        if let Some(id) = self.unload() {
            self.log.for_cartridge(&id).info("unloaded");
        }
    }

    fn unload(&mut self) -> Option<String> {
        let Session {
            host, namespace, ..
        } = self.session.take()?;
        let id = host.manifest().id.clone();
        // The VM gives its memory back before the namespace goes
        drop(host);
        namespace.unmount();
        Some(id)
    }

    /// End the session after a fatal error and keep the reason
    fn fault(&mut self, status: Status) -> Status {
        let tick = self.current_tick();
        let log = match self.manifest() {
            Some(manifest) => self.log.for_cartridge(&manifest.id),
            None => self.log.clone(),
        };
        log.log(LogLevel::Fatal, tick, format!("cartridge faulted: {}", status));
        self.unload();
        self.diagnostic = Some(status.clone());
        status
    }

    /// Rebuild the VM from a fresh read of the entry file
    ///
    /// All script state is reset and the tick counter starts over. If the
    /// new VM cannot be built the session ends.
    pub fn hot_reload(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_cartridge)?;
        let idle = InputSnapshot::idle();
        let mut env = HostEnv {
            namespace: &mut session.namespace,
            input: &idle,
            tick: 0,
        };
        match session.host.hot_reload(&mut env) {
            Ok(()) => {
                let mut scheduler = self.config.scheduler();
                scheduler.start()?;
                session.scheduler = scheduler;
                session.pending = FrameCommands::default();
                tracing::info!(cart_root = %session.cart_root.display(), "hot reload");
                Ok(())
            }
            Err(status) => Err(self.fault(status.context("hot reload failed"))),
        }
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Advance by `elapsed` seconds of host time
    ///
    /// Runs as many fixed updates as fit, up to the per-frame cap, each with
    /// one frozen input snapshot. Non-fatal update errors are in the report;
    /// a fatal one ends the session and is returned.
    pub fn frame(&mut self, elapsed: f64) -> Result<FrameReport> {
        let session = self.session.as_mut().ok_or_else(no_cartridge)?;
        let input = &mut self.input;
        let Session {
            host,
            namespace,
            scheduler,
            pending,
            ..
        } = session;

        let report = scheduler.frame(elapsed, |tick, dt| {
            let snapshot = input.snapshot(tick);
            let mut env = HostEnv {
                namespace: &mut *namespace,
                input: &snapshot,
                tick,
            };
            host.update(dt, &mut env)
        });

        let max_draw = host.manifest().caps.max_draw_calls as usize;
        let discarded = queue_commands(pending, host.take_commands(), max_draw);
        if discarded > 0 {
            self.log.for_cartridge(&host.manifest().id).log(
                LogLevel::Warn,
                Some(scheduler.tick_state().tick()),
                format!("{} undrained commands discarded", discarded),
            );
        }

        if !report.errors.is_empty() {
            tracing::debug!(
                errors = report.errors.len(),
                tick = scheduler.tick_state().tick(),
                "updates failed this frame"
            );
        }

        let fault = report.fault.clone();
        let exited = fault.is_none()
            && host.exit_requested()
            && scheduler.state() == SchedulerState::Running;
        if exited {
            scheduler.stop();
        }

        if let Some(status) = fault {
            return Err(self.fault(status));
        }
        if exited {
            let tick = self.current_tick();
            if let Some(manifest) = self.manifest() {
                self.log
                    .for_cartridge(&manifest.id)
                    .log(LogLevel::Info, tick, "exit requested, scheduler stopped");
            }
        }
        Ok(report)
    }

    /// Run exactly one fixed update
    pub fn tick(&mut self) -> Result<FrameReport> {
        let period = self
            .session
            .as_ref()
            .ok_or_else(no_cartridge)?
            .scheduler
            .tick_state()
            .period();
        self.frame(period)
    }

    /// Run up to `n` updates, stopping early if the cartridge stops
    ///
    /// Returns the number of updates run.
    pub fn run_ticks(&mut self, n: u64) -> Result<u64> {
        let mut ran = 0;
        while ran < n && self.is_running() {
            let report = self.tick()?;
            if report.updates == 0 {
                break;
            }
            ran += u64::from(report.updates);
        }
        Ok(ran)
    }

    /// Take the draw and audio commands produced since the last call
    ///
    /// Commands left undrained are bounded: once more than one frame's draw
    /// cap accumulates, the oldest are discarded with a warning.
    pub fn take_commands(&mut self) -> FrameCommands {
        self.session
            .as_mut()
            .map(|session| std::mem::take(&mut session.pending))
            .unwrap_or_default()
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Replace the source snapshots are frozen from
    pub fn set_input(&mut self, source: impl InputSource + 'static) {
        self.input.set_source(Box::new(source));
    }

    /// Record every frozen snapshot, up to `capacity` frames
    pub fn start_recording(&mut self, capacity: usize) {
        self.input.start(capacity);
    }

    /// Stop recording and return what was captured
    pub fn stop_recording(&mut self) -> Option<InputRecording> {
        self.input.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.input.is_recording()
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    /// Check if a cartridge is loaded and its scheduler is running
    pub fn is_running(&self) -> bool {
        self.scheduler_state() == Some(SchedulerState::Running)
    }

    pub fn scheduler_state(&self) -> Option<SchedulerState> {
        self.session.as_ref().map(|s| s.scheduler.state())
    }

    /// Number of completed updates in this session
    pub fn current_tick(&self) -> Option<Tick> {
        self.session.as_ref().map(|s| s.scheduler.tick_state().tick())
    }

    pub fn manifest(&self) -> Option<&CartridgeManifest> {
        self.session.as_ref().map(|s| s.host.manifest())
    }

    pub fn script(&self) -> Option<&ScriptHost> {
        self.session.as_ref().map(|s| &s.host)
    }

    /// Host tooling access to the mounted namespace
    pub fn namespace_mut(&mut self) -> Option<&mut Namespace> {
        self.session.as_mut().map(|s| &mut s.namespace)
    }

    pub fn budget(&self) -> Option<&SharedBudget> {
        self.session.as_ref().map(|s| &s.budget)
    }

    pub fn usage(&self) -> Option<UsageSnapshot> {
        self.session.as_ref().map(|s| s.budget.borrow().snapshot())
    }

    /// Hash of the script state, for determinism checks
    pub fn state_hash(&self) -> Option<u64> {
        self.session.as_ref().and_then(|s| s.host.state_hash())
    }

    /// Error the script last saw from a bound function or a failed update
    pub fn last_error(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.host.last_error())
    }

    /// Why the last load failed or the last session ended abnormally
    pub fn diagnostic(&self) -> Option<&Status> {
        self.diagnostic.as_ref()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.unload();
    }
}

/// Queue a frame's commands behind any undrained ones
///
/// Past `max_draw` draw commands or [`MAX_PENDING_AUDIO`] audio commands the
/// oldest are discarded. Returns how many were dropped.
fn queue_commands(pending: &mut FrameCommands, commands: FrameCommands, max_draw: usize) -> usize {
    pending.draw.extend(commands.draw);
    pending.audio.extend(commands.audio);
    let stale_draw = pending.draw.len().saturating_sub(max_draw);
    pending.draw.drain(..stale_draw);
    let stale_audio = pending.audio.len().saturating_sub(MAX_PENDING_AUDIO);
    pending.audio.drain(..stale_audio);
    stale_draw + stale_audio
}

fn no_cartridge() -> Status {
    Status::failed_precondition("no cartridge loaded")
}

fn read_manifest(cart_root: &Path) -> Result<CartridgeManifest> {
    let path = cart_root.join(MANIFEST_FILE);
    let meta = fs::metadata(&path).map_err(|err| io_status(&path, err))?;
    if !meta.is_file() {
        return Err(Status::not_found(format!(
            "{} is not a file",
            path.display()
        )));
    }
    if meta.len() > MAX_MANIFEST_BYTES {
        return Err(Status::resource_exhausted(format!(
            "{} is {} bytes, limit is {}",
            path.display(),
            meta.len(),
            MAX_MANIFEST_BYTES
        )));
    }
    let raw = fs::read(&path).map_err(|err| io_status(&path, err))?;
    Ok(CartridgeManifest::validate(&raw)?)
}

fn io_status(path: &Path, err: io::Error) -> Status {
    let message = format!("{}: {}", path.display(), err);
    match err.kind() {
        io::ErrorKind::NotFound => Status::not_found(message),
        io::ErrorKind::PermissionDenied => Status::permission_denied(message),
        _ => Status::unavailable(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinbox_core::input::FnInput;
    use tinbox_core::{ErrorKind, InputPlayback, Resource, Value};
    use tinbox_script::{AudioCommand, DrawCommand};

    const MANIFEST: &str = "id = \"demo\"\ntitle = \"Demo\"\nversion = \"1.0\"\n\
        api_version = \"0.1\"\nentry = \"main.ron\"\n";

    const COUNTER: &str = r#"Program(
        init: [SetGlobal(name: "n", value: Literal(Int(0)))],
        update: [
            ModifyGlobal(name: "n", op: Add, value: Literal(Int(1))),
            Call("gfx.clear", [Literal(Int(0))]),
        ],
    )"#;

    struct Cart {
        dir: tempfile::TempDir,
        saves: tempfile::TempDir,
    }

    impl Cart {
        fn new(manifest: &str, script: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let saves = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join(MANIFEST_FILE), manifest).unwrap();
            std::fs::write(dir.path().join("main.ron"), script).unwrap();
            Self { dir, saves }
        }

        fn config(&self) -> RuntimeConfig {
            RuntimeConfig::default().with_save_root(self.saves.path())
        }

        fn runtime(&self) -> Runtime {
            Runtime::new(self.config()).unwrap()
        }

        fn loaded(&self) -> Runtime {
            let mut runtime = self.runtime();
            runtime.load_cartridge(self.dir.path()).unwrap();
            runtime
        }

        fn save_dir(&self) -> PathBuf {
            self.saves.path().join("demo")
        }
    }

    fn global(runtime: &Runtime, name: &str) -> Option<Value> {
        runtime
            .script()
            .and_then(|host| host.vm())
            .and_then(|vm| vm.global(name).cloned())
    }

    #[test]
    fn test_load_and_tick() {
        let cart = Cart::new(MANIFEST, COUNTER);
        let mut runtime = cart.loaded();
        assert!(runtime.is_running());
        assert_eq!(runtime.manifest().unwrap().id, "demo");
        assert_eq!(global(&runtime, "n"), Some(Value::Int(0)));

        assert_eq!(runtime.run_ticks(5).unwrap(), 5);
        assert_eq!(runtime.current_tick(), Some(5));
        assert_eq!(global(&runtime, "n"), Some(Value::Int(5)));
        assert!(cart.save_dir().is_dir());
    }

    #[test]
    fn test_commands_collected_per_frame() {
        let cart = Cart::new(MANIFEST, COUNTER);
        let mut runtime = cart.loaded();
        runtime.run_ticks(3).unwrap();

        let commands = runtime.take_commands();
        assert_eq!(commands.draw.len(), 3);
        assert!(matches!(commands.draw[0], DrawCommand::Clear { .. }));
        assert!(runtime.take_commands().is_empty());
    }

    #[test]
    fn test_undrained_commands_are_bounded() {
        let manifest = format!("{}[caps]\nmax_draw_calls = 2\n", MANIFEST);
        let script = r#"Program(
            init: [],
            update: [
                ModifyGlobal(name: "n", op: Add, value: Literal(Int(1))),
                Call("gfx.clear", [Global("n")]),
            ],
        )"#;
        let cart = Cart::new(&manifest, script);
        let mut runtime = cart.loaded();
        assert_eq!(runtime.run_ticks(5).unwrap(), 5);

        // Only the newest draws survive
        let commands = runtime.take_commands();
        assert_eq!(
            commands.draw,
            vec![DrawCommand::Clear { color: 4 }, DrawCommand::Clear { color: 5 }]
        );
        let warned = runtime
            .log()
            .records()
            .iter()
            .filter(|r| r.level == LogLevel::Warn && r.message.contains("undrained"))
            .count();
        assert_eq!(warned, 3);
    }

    #[test]
    fn test_queue_commands_caps_audio() {
        let mut pending = FrameCommands::default();
        let audio = (0..MAX_PENDING_AUDIO as u32 + 10)
            .map(|channel| AudioCommand::Stop { channel })
            .collect();
        let dropped = queue_commands(
            &mut pending,
            FrameCommands {
                draw: vec![],
                audio,
            },
            8,
        );
        assert_eq!(dropped, 10);
        assert_eq!(pending.audio.len(), MAX_PENDING_AUDIO);
        assert_eq!(pending.audio[0], AudioCommand::Stop { channel: 10 });
    }

    #[test]
    fn test_no_cartridge() {
        let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let err = runtime.tick().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert!(runtime.hot_reload().is_err());
        assert!(runtime.take_commands().is_empty());
        assert_eq!(runtime.state_hash(), None);
        runtime.shutdown();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RuntimeConfig {
            tick_hz: 0,
            ..RuntimeConfig::default()
        };
        let err = Runtime::new(config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_manifest_rejection_mounts_nothing() {
        let missing_entry = "id = \"demo\"\ntitle = \"Demo\"\nversion = \"1\"\napi_version = \"0.1\"\n";
        let bad_schema = MANIFEST.replace("\"0.1\"", "\"9.0\"");

        for (manifest, code) in [
            (missing_entry.to_string(), "manifest error 101"),
            (bad_schema, "manifest error 102"),
        ] {
            let cart = Cart::new(&manifest, COUNTER);
            let mut runtime = cart.runtime();
            let err = runtime.load_cartridge(cart.dir.path()).unwrap_err();
            assert!(err.message().contains(code), "{}", err);
            assert!(!runtime.is_loaded());
            assert!(!cart.save_dir().exists());
            assert_eq!(runtime.diagnostic(), Some(&err));
        }
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let err = runtime.load_cartridge(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!runtime.is_loaded());
    }

    #[test]
    fn test_failed_load_returns_to_no_cartridge() {
        let good = Cart::new(MANIFEST, COUNTER);
        let broken = Cart::new(MANIFEST, "Program(init: [Nope])");
        let raising = Cart::new(MANIFEST, r#"Program(init: [Raise(Literal(String("no")))])"#);

        let mut runtime = good.loaded();
        let err = runtime.load_cartridge(broken.dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!runtime.is_loaded());
        assert!(runtime.diagnostic().is_some());
        assert!(runtime.log().last_at_least(LogLevel::Error).is_some());

        let err = runtime.load_cartridge(raising.dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert!(!runtime.is_loaded());

        // A later good load clears the diagnostic
        runtime.load_cartridge(good.dir.path()).unwrap();
        assert!(runtime.diagnostic().is_none());
    }

    #[test]
    fn test_update_error_is_not_fatal() {
        let script = r#"Program(
            init: [SetGlobal(name: "n", value: Literal(Int(0)))],
            update: [
                ModifyGlobal(name: "n", op: Add, value: Literal(Int(1))),
                If(
                    condition: Eq(Param("tick"), Literal(Int(1))),
                    then_effects: [Raise(Literal(String("bad tick")))],
                ),
            ],
        )"#;
        let cart = Cart::new(MANIFEST, script);
        let mut runtime = cart.loaded();

        assert!(runtime.tick().unwrap().errors.is_empty());
        let report = runtime.tick().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(runtime.last_error().unwrap().contains("bad tick"));
        // The failed tick changed nothing
        assert_eq!(global(&runtime, "n"), Some(Value::Int(1)));

        runtime.tick().unwrap();
        assert!(runtime.is_running());
        assert_eq!(global(&runtime, "n"), Some(Value::Int(2)));
        assert_eq!(runtime.current_tick(), Some(3));
    }

    #[test]
    fn test_frame_cap_drops_excess_time() {
        let cart = Cart::new(MANIFEST, COUNTER);
        let config = RuntimeConfig {
            max_frame_time: 2.0,
            ..cart.config()
        };
        let mut runtime = Runtime::new(config).unwrap();
        runtime.load_cartridge(cart.dir.path()).unwrap();

        let report = runtime.frame(100.0 / 60.0).unwrap();
        assert_eq!(report.updates, 4);
        assert!(report.dropped > 0.0);
        assert!(report.alpha < 1.0);
        assert_eq!(global(&runtime, "n"), Some(Value::Int(4)));

        // The next ordinary frame is not a catch-up burst
        let report = runtime.frame(1.0 / 60.0).unwrap();
        assert_eq!(report.updates, 1);
    }

    #[test]
    fn test_exit_stops_scheduler() {
        let script = r#"Program(
            update: [
                ModifyGlobal(name: "n", op: Add, value: Literal(Int(1))),
                If(
                    condition: Ge(Global("n"), Literal(Int(3))),
                    then_effects: [Call("sys.exit", [])],
                ),
            ],
        )"#;
        let cart = Cart::new(MANIFEST, script);
        let mut runtime = cart.loaded();

        assert_eq!(runtime.run_ticks(10).unwrap(), 3);
        assert_eq!(runtime.scheduler_state(), Some(SchedulerState::Stopped));
        assert!(runtime.is_loaded());
        assert_eq!(runtime.tick().unwrap().updates, 0);
        assert_eq!(global(&runtime, "n"), Some(Value::Int(3)));
    }

    #[test]
    fn test_failed_hot_reload_faults() {
        let cart = Cart::new(MANIFEST, COUNTER);
        let mut runtime = cart.loaded();
        runtime.run_ticks(2).unwrap();

        std::fs::write(cart.dir.path().join("main.ron"), "Program(update: [Bogus])").unwrap();
        let err = runtime.hot_reload().unwrap_err();
        assert!(err.message().contains("hot reload failed"));
        assert!(!runtime.is_loaded());
        assert_eq!(runtime.diagnostic(), Some(&err));

        let fatal = runtime.log().last_at_least(LogLevel::Fatal).unwrap();
        assert_eq!(fatal.cartridge.as_deref(), Some("demo"));
        assert_eq!(fatal.tick, Some(2));
    }

    #[test]
    fn test_hot_reload_resets_session() {
        let cart = Cart::new(MANIFEST, COUNTER);
        let mut runtime = cart.loaded();
        runtime.run_ticks(4).unwrap();
        let before = runtime.usage().unwrap().get(Resource::VmMemory);

        std::fs::write(
            cart.dir.path().join("main.ron"),
            r#"Program(init: [SetGlobal(name: "v", value: Literal(Int(2)))])"#,
        )
        .unwrap();
        runtime.hot_reload().unwrap();
        assert_eq!(runtime.current_tick(), Some(0));
        assert_eq!(global(&runtime, "n"), None);
        assert_eq!(global(&runtime, "v"), Some(Value::Int(2)));
        assert!(runtime.usage().unwrap().get(Resource::VmMemory) <= before);
        assert!(runtime.take_commands().is_empty());
        assert!(runtime.is_running());
    }

    #[test]
    fn test_hints_lower_host_limits() {
        let manifest = format!("{}[limits]\nsave_quota_bytes = 1000\n", MANIFEST);
        let cart = Cart::new(&manifest, COUNTER);
        let runtime = cart.loaded();
        let budget = runtime.budget().unwrap().borrow();
        assert_eq!(budget.ceiling(Resource::SaveBytes).hard, 1000);
        assert_eq!(
            budget.ceiling(Resource::AssetBytes),
            runtime.config().limits.asset_bytes
        );
    }

    #[test]
    fn test_save_round_trip() {
        let writer = r#"Program(
            init: [Call("fs.write", [Literal(String("save:/slot1.dat")), Literal(String("level=3"))])],
        )"#;
        let cart = Cart::new(MANIFEST, writer);
        let mut runtime = cart.loaded();
        assert_eq!(runtime.last_error(), None);
        runtime.shutdown();
        assert_eq!(
            std::fs::read(cart.save_dir().join("slot1.dat")).unwrap(),
            b"level=3"
        );

        std::fs::write(
            cart.dir.path().join("main.ron"),
            r#"Program(
                init: [SetGlobal(name: "slot", value: Call("fs.read", [Literal(String("save:/slot1.dat"))]))],
            )"#,
        )
        .unwrap();
        runtime.load_cartridge(cart.dir.path()).unwrap();
        assert_eq!(global(&runtime, "slot"), Some(Value::String("level=3".into())));
        assert!(runtime.usage().unwrap().get(Resource::SaveBytes) >= 7);
    }

    #[test]
    fn test_save_disabled_by_permission() {
        let manifest = format!("{}[permissions]\nsave_storage = false\n", MANIFEST);
        let writer = r#"Program(
            init: [Call("fs.write", [Literal(String("save:/slot1.dat")), Literal(String("x"))])],
        )"#;
        let cart = Cart::new(&manifest, writer);
        let runtime = cart.loaded();
        assert!(runtime.last_error().unwrap().contains("PermissionDenied"));
        assert!(!cart.save_dir().exists());
    }

    const DICE: &str = r#"Program(
        init: [
            SetGlobal(name: "x", value: Literal(Int(0))),
            SetGlobal(name: "rolls", value: Literal(Int(0))),
        ],
        update: [
            If(
                condition: Call("inp.key", [Literal(Int(32))]),
                then_effects: [
                    ModifyGlobal(name: "x", op: Add, value: Call("sys.rand_range", [Literal(Int(1)), Literal(Int(6))])),
                ],
            ),
            ModifyGlobal(name: "rolls", op: Add, value: Call("sys.rand_range", [Literal(Int(0)), Literal(Int(9))])),
        ],
    )"#;

    fn run_hashes(runtime: &mut Runtime, ticks: u64) -> Vec<u64> {
        (0..ticks)
            .map(|_| {
                runtime.tick().unwrap();
                runtime.state_hash().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_replay_is_deterministic() {
        let cart = Cart::new(MANIFEST, DICE);

        let mut first = cart.runtime();
        first.set_input(FnInput(|tick: Tick| {
            let mut snapshot = InputSnapshot::idle();
            snapshot.set_key(32, tick % 3 == 0);
            snapshot
        }));
        first.start_recording(DEFAULT_RECORDING_CAPACITY);
        first.load_cartridge(cart.dir.path()).unwrap();
        let recorded = run_hashes(&mut first, 30);
        let recording = first.stop_recording().unwrap();
        assert_eq!(recording.frames.len(), 30);
        assert!(!recording.truncated);
        first.shutdown();

        let mut second = cart.runtime();
        second.set_input(InputPlayback::new(recording));
        second.load_cartridge(cart.dir.path()).unwrap();
        assert_eq!(run_hashes(&mut second, 30), recorded);

        // Same input with another seed diverges
        let config = cart.config().with_seed(12345);
        let mut reseeded = Runtime::new(config).unwrap();
        reseeded.set_input(FnInput(|tick: Tick| {
            let mut snapshot = InputSnapshot::idle();
            snapshot.set_key(32, tick % 3 == 0);
            snapshot
        }));
        reseeded.load_cartridge(cart.dir.path()).unwrap();
        assert_ne!(run_hashes(&mut reseeded, 30), recorded);
    }
}
