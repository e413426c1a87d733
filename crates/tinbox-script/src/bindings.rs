//! Native functions exposed to scripts
//!
//! Every function is described by a [`Binding`]: its name, the expected
//! argument list and an optional permission. Arguments are validated in full
//! (arity, types, ranges and handle liveness) before the function runs, so a
//! bad call has no side effects at all.
//!
//! Failures never unwind into the script. The call evaluates to null and the
//! error text is kept for `sys.last_error()` until `sys.clear_error()`.

use crate::commands::{AudioCommand, DrawCommand};
use crate::expr::{NativeCall, MAX_STRING_BYTES};
use crate::handles::{HandleKind, ImageAsset, SoundAsset};
use crate::manifest::{CartridgeManifest, Permissions};
use crate::vm::VmState;
use tinbox_core::input::{GAMEPAD_AXES, GAMEPAD_BUTTONS, GAMEPAD_COUNT, KEY_COUNT, MOUSE_BUTTONS};
use tinbox_core::{
    InputSnapshot, LogContext, LogLevel, Resource, Result, SharedBudget, Status, Value,
};
use tinbox_vfs::{EntryKind, Namespace, MAX_PATH_LEN};

/// Longest message accepted by `sys.log`
pub const MAX_LOG_MESSAGE: usize = 4096;

/// Longest string drawn by `gfx.text`
pub const MAX_TEXT_LEN: usize = 1024;

/// Coordinates are accepted in `[-COORD_LIMIT, COORD_LIMIT]`
pub const COORD_LIMIT: f64 = 1_000_000.0;

/// Expected shape of one argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgSpec {
    /// An int in `[min, max]`
    Int { min: i64, max: i64 },
    /// A finite number in `[min, max]`; ints are accepted
    Float { min: f64, max: f64 },
    /// A string of at most `max_len` bytes
    Str { max_len: usize },
    Bool,
    Any,
    /// A live handle of the given kind
    Handle(HandleKind),
}

/// A permission a binding needs from the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    SaveStorage,
    Audio,
}

impl Permission {
    fn granted(self, permissions: &Permissions) -> bool {
        match self {
            Permission::SaveStorage => permissions.save_storage,
            Permission::Audio => permissions.audio,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Permission::SaveStorage => "save_storage",
            Permission::Audio => "audio",
        }
    }
}

pub type BindingFn = fn(&mut CallEnv<'_>, &[Value]) -> Result<Value>;

/// A native function callable from scripts
pub struct Binding {
    pub name: &'static str,
    pub params: &'static [ArgSpec],
    pub permission: Option<Permission>,
    pub func: BindingFn,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("permission", &self.permission)
            .finish()
    }
}

const COLOR: ArgSpec = ArgSpec::Int {
    min: 0,
    max: u32::MAX as i64,
};
const COORD: ArgSpec = ArgSpec::Float {
    min: -COORD_LIMIT,
    max: COORD_LIMIT,
};
const EXTENT: ArgSpec = ArgSpec::Float {
    min: 0.0,
    max: COORD_LIMIT,
};
const PATH: ArgSpec = ArgSpec::Str {
    max_len: MAX_PATH_LEN,
};
const KEY: ArgSpec = ArgSpec::Int {
    min: 0,
    max: KEY_COUNT as i64 - 1,
};
const PAD: ArgSpec = ArgSpec::Int {
    min: 0,
    max: GAMEPAD_COUNT as i64 - 1,
};
const CHANNEL: ArgSpec = ArgSpec::Int { min: 0, max: 255 };

macro_rules! binding {
    ($name:literal, [$($param:expr),* $(,)?], $func:path) => {
        Binding {
            name: $name,
            params: &[$($param),*],
            permission: None,
            func: $func,
        }
    };
    ($name:literal, [$($param:expr),* $(,)?], $func:path, $permission:expr) => {
        Binding {
            name: $name,
            params: &[$($param),*],
            permission: Some($permission),
            func: $func,
        }
    };
}

static BINDINGS: &[Binding] = &[
    // sys
    binding!("sys.log", [ArgSpec::Str { max_len: MAX_LOG_MESSAGE }], sys_log),
    binding!("sys.tick", [], sys_tick),
    binding!("sys.dt", [], sys_dt),
    binding!("sys.time", [], sys_time),
    binding!("sys.rand", [], sys_rand),
    binding!("sys.randf", [], sys_randf),
    binding!(
        "sys.rand_range",
        [
            ArgSpec::Int { min: i32::MIN as i64, max: i32::MAX as i64 },
            ArgSpec::Int { min: i32::MIN as i64, max: i32::MAX as i64 },
        ],
        sys_rand_range
    ),
    binding!("sys.last_error", [], sys_last_error),
    binding!("sys.clear_error", [], sys_clear_error),
    binding!("sys.exit", [], sys_exit),
    // fs
    binding!("fs.exists", [PATH], fs_exists),
    binding!("fs.read", [PATH], fs_read),
    binding!(
        "fs.write",
        [PATH, ArgSpec::Str { max_len: MAX_STRING_BYTES }],
        fs_write,
        Permission::SaveStorage
    ),
    binding!("fs.remove", [PATH], fs_remove, Permission::SaveStorage),
    binding!("fs.list", [PATH], fs_list),
    // inp
    binding!("inp.key", [KEY], inp_key),
    binding!("inp.keyp", [KEY], inp_keyp),
    binding!(
        "inp.button",
        [PAD, ArgSpec::Int { min: 0, max: GAMEPAD_BUTTONS as i64 - 1 }],
        inp_button
    ),
    binding!(
        "inp.axis",
        [PAD, ArgSpec::Int { min: 0, max: GAMEPAD_AXES as i64 - 1 }],
        inp_axis
    ),
    binding!("inp.mouse_x", [], inp_mouse_x),
    binding!("inp.mouse_y", [], inp_mouse_y),
    binding!(
        "inp.mouse_button",
        [ArgSpec::Int { min: 0, max: MOUSE_BUTTONS as i64 - 1 }],
        inp_mouse_button
    ),
    // gfx
    binding!("gfx.clear", [COLOR], gfx_clear),
    binding!("gfx.rect", [COORD, COORD, EXTENT, EXTENT, COLOR], gfx_rect),
    binding!("gfx.line", [COORD, COORD, COORD, COORD, COLOR], gfx_line),
    binding!(
        "gfx.text",
        [COORD, COORD, ArgSpec::Str { max_len: MAX_TEXT_LEN }, COLOR],
        gfx_text
    ),
    binding!("gfx.load_image", [PATH], gfx_load_image),
    binding!("gfx.image", [ArgSpec::Handle(HandleKind::Image), COORD, COORD], gfx_image),
    binding!("gfx.free_image", [ArgSpec::Handle(HandleKind::Image)], gfx_free_image),
    // audio
    binding!("audio.load", [PATH], audio_load, Permission::Audio),
    binding!(
        "audio.play",
        [
            ArgSpec::Handle(HandleKind::Sound),
            CHANNEL,
            ArgSpec::Float { min: 0.0, max: 1.0 },
            ArgSpec::Bool,
        ],
        audio_play,
        Permission::Audio
    ),
    binding!("audio.stop", [CHANNEL], audio_stop, Permission::Audio),
    binding!(
        "audio.free",
        [ArgSpec::Handle(HandleKind::Sound)],
        audio_free,
        Permission::Audio
    ),
];

/// Every bound function
pub fn bindings() -> &'static [Binding] {
    BINDINGS
}

/// Find a bound function by name
pub fn lookup(name: &str) -> Option<&'static Binding> {
    BINDINGS.iter().find(|b| b.name == name)
}

/// Check `args` against `binding` without calling it
pub fn validate(
    binding: &Binding,
    args: &[Value],
    permissions: &Permissions,
    state: &VmState,
) -> Result<()> {
    if let Some(permission) = binding.permission {
        if !permission.granted(permissions) {
            return Err(Status::permission_denied(format!(
                "{} requires the {} permission",
                binding.name,
                permission.as_str()
            )));
        }
    }
    if args.len() != binding.params.len() {
        return Err(Status::invalid_argument(format!(
            "{} takes {} argument(s), got {}",
            binding.name,
            binding.params.len(),
            args.len()
        )));
    }
    for (i, (spec, arg)) in binding.params.iter().zip(args).enumerate() {
        check_arg(spec, arg, state)
            .map_err(|status| status.context(format_args!("{} argument {}", binding.name, i + 1)))?;
    }
    Ok(())
}

fn check_arg(spec: &ArgSpec, arg: &Value, state: &VmState) -> Result<()> {
    match (spec, arg) {
        (ArgSpec::Any, _) => Ok(()),
        (ArgSpec::Bool, Value::Bool(_)) => Ok(()),
        (ArgSpec::Int { min, max }, Value::Int(v)) => {
            if v < min || v > max {
                return Err(Status::invalid_argument(format!(
                    "{} is outside [{}, {}]",
                    v, min, max
                )));
            }
            Ok(())
        }
        (ArgSpec::Float { min, max }, Value::Int(_) | Value::Float(_)) => {
            let v = arg.as_float().unwrap_or(f64::NAN);
            if !v.is_finite() || v < *min || v > *max {
                return Err(Status::invalid_argument(format!(
                    "{} is outside [{}, {}]",
                    v, min, max
                )));
            }
            Ok(())
        }
        (ArgSpec::Str { max_len }, Value::String(s)) => {
            if s.len() > *max_len {
                return Err(Status::invalid_argument(format!(
                    "string of {} bytes is longer than {}",
                    s.len(),
                    max_len
                )));
            }
            Ok(())
        }
        (ArgSpec::Handle(kind), Value::Int(id)) => {
            if !state.handles.is_live(*kind, *id) {
                return Err(Status::invalid_argument(format!(
                    "{} is not a live {} handle",
                    id, kind
                )));
            }
            Ok(())
        }
        (spec, arg) => Err(Status::invalid_argument(format!(
            "expected {}, got {}",
            spec_name(spec),
            arg.type_name()
        ))),
    }
}

fn spec_name(spec: &ArgSpec) -> &'static str {
    match spec {
        ArgSpec::Int { .. } => "int",
        ArgSpec::Float { .. } => "number",
        ArgSpec::Str { .. } => "string",
        ArgSpec::Bool => "bool",
        ArgSpec::Any => "any",
        ArgSpec::Handle(HandleKind::Image) => "image handle",
        ArgSpec::Handle(HandleKind::Sound) => "sound handle",
    }
}

/// Everything a bound function may touch during one call
pub struct CallEnv<'a> {
    pub(crate) state: &'a mut VmState,
    pub(crate) namespace: &'a mut Namespace,
    pub(crate) input: &'a InputSnapshot,
    pub(crate) manifest: &'a CartridgeManifest,
    pub(crate) log: &'a LogContext,
    pub(crate) budget: &'a SharedBudget,
}

impl CallEnv<'_> {
    fn fail(&mut self, name: &str, status: Status) -> Value {
        tracing::debug!(function = name, %status, "native call failed");
        self.state.last_error = Some(status.to_string());
        Value::Null
    }
}

impl NativeCall for CallEnv<'_> {
    fn call(&mut self, name: &str, args: &[Value]) -> Value {
        let Some(binding) = lookup(name) else {
            return self.fail(name, Status::not_found(format!("no function named {}", name)));
        };
        if let Err(status) = validate(binding, args, &self.manifest.permissions, self.state) {
            return self.fail(name, status);
        }
        match (binding.func)(self, args) {
            Ok(value) => value,
            Err(status) => self.fail(name, status),
        }
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        let charge = self.budget.borrow_mut().charge(Resource::LogRate, 1);
        match charge {
            Err(status) => {
                self.state.last_error = Some(status.to_string());
            }
            Ok(charge) => {
                if charge.is_over_soft() && !self.state.log_warned {
                    self.state.log_warned = true;
                    self.log
                        .host()
                        .warn(format!("{}: log rate above soft limit", self.manifest.id));
                }
                // Scripts cannot end their own session through the log
                let level = level.min(LogLevel::Error);
                self.log.log(level, Some(self.state.tick), message);
            }
        }
    }
}

fn int(args: &[Value], i: usize) -> i64 {
    args[i].as_int().unwrap_or_default()
}

fn float(args: &[Value], i: usize) -> f64 {
    args[i].as_float().unwrap_or_default()
}

fn text(args: &[Value], i: usize) -> &str {
    args[i].as_str().unwrap_or_default()
}

fn color(args: &[Value], i: usize) -> u32 {
    int(args, i) as u32
}

// === sys ===

fn sys_log(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    env.log(LogLevel::Info, text(args, 0));
    Ok(Value::Null)
}

fn sys_tick(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    Ok(Value::Int(env.state.tick as i64))
}

fn sys_dt(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    Ok(Value::Float(env.state.dt))
}

fn sys_time(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    Ok(Value::Float(env.state.tick as f64 * env.state.dt))
}

fn sys_rand(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    Ok(Value::Int(env.state.rng.next_int() as i64))
}

fn sys_randf(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    Ok(Value::Float(env.state.rng.next_f64()))
}

fn sys_rand_range(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let (min, max) = (int(args, 0) as i32, int(args, 1) as i32);
    Ok(Value::Int(env.state.rng.range(min, max) as i64))
}

fn sys_last_error(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    Ok(env
        .state
        .last_error
        .clone()
        .map_or(Value::Null, Value::String))
}

fn sys_clear_error(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    env.state.last_error = None;
    Ok(Value::Null)
}

fn sys_exit(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    env.state.exit_requested = true;
    Ok(Value::Null)
}

// === fs ===

fn fs_exists(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(env.namespace.exists(text(args, 0))))
}

fn fs_read(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::String(env.namespace.read_text(text(args, 0))?))
}

fn fs_write(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    env.namespace
        .write_file(text(args, 0), text(args, 1).as_bytes())?;
    Ok(Value::Bool(true))
}

fn fs_remove(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    env.namespace.remove(text(args, 0))?;
    Ok(Value::Bool(true))
}

fn fs_list(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let entries = env.namespace.list_dir(text(args, 0))?;
    Ok(Value::List(
        entries
            .into_iter()
            .map(|entry| match entry.kind {
                EntryKind::Dir => Value::String(format!("{}/", entry.name)),
                EntryKind::File => Value::String(entry.name),
            })
            .collect(),
    ))
}

// === inp ===

fn inp_key(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(env.input.key_down(int(args, 0) as usize)))
}

fn inp_keyp(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let code = int(args, 0) as usize;
    Ok(Value::Bool(
        env.input.key_down(code) && !env.state.prev_input.key_down(code),
    ))
}

fn inp_button(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let (pad, button) = (int(args, 0) as usize, int(args, 1) as usize);
    Ok(Value::Bool(env.input.button_down(pad, button)))
}

fn inp_axis(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let (pad, axis) = (int(args, 0) as usize, int(args, 1) as usize);
    Ok(Value::Float(env.input.axis(pad, axis) as f64))
}

fn inp_mouse_x(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    Ok(Value::Float(env.input.mouse.x as f64))
}

fn inp_mouse_y(env: &mut CallEnv<'_>, _args: &[Value]) -> Result<Value> {
    Ok(Value::Float(env.input.mouse.y as f64))
}

fn inp_mouse_button(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(
        env.input.mouse_button_down(int(args, 0) as usize),
    ))
}

// === gfx ===

fn gfx_clear(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    env.state.commands.push_draw(DrawCommand::Clear {
        color: color(args, 0),
    })?;
    Ok(Value::Null)
}

fn gfx_rect(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    env.state.commands.push_draw(DrawCommand::Rect {
        x: float(args, 0),
        y: float(args, 1),
        w: float(args, 2),
        h: float(args, 3),
        color: color(args, 4),
    })?;
    Ok(Value::Null)
}

fn gfx_line(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    env.state.commands.push_draw(DrawCommand::Line {
        x0: float(args, 0),
        y0: float(args, 1),
        x1: float(args, 2),
        y1: float(args, 3),
        color: color(args, 4),
    })?;
    Ok(Value::Null)
}

fn gfx_text(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    env.state.commands.push_draw(DrawCommand::Text {
        x: float(args, 0),
        y: float(args, 1),
        text: text(args, 2).to_string(),
        color: color(args, 3),
    })?;
    Ok(Value::Null)
}

fn gfx_load_image(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let path = text(args, 0);
    env.state.handles.images.ensure_room()?;
    let bytes = env.namespace.read_file(path)?.len() as u64;
    let id = env.state.handles.images.insert(ImageAsset {
        path: path.to_string(),
        bytes,
    })?;
    Ok(Value::Int(id))
}

fn gfx_image(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let image = int(args, 0);
    let path = env
        .state
        .handles
        .images
        .get(image)
        .map(|asset| asset.path.clone())
        .ok_or_else(|| Status::internal("validated image handle vanished"))?;
    env.state.commands.push_draw(DrawCommand::Image {
        image,
        path,
        x: float(args, 1),
        y: float(args, 2),
    })?;
    Ok(Value::Null)
}

fn gfx_free_image(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    env.state.handles.images.remove(int(args, 0));
    Ok(Value::Null)
}

// === audio ===

fn check_channel(env: &CallEnv<'_>, channel: i64) -> Result<u32> {
    let channels = env.manifest.caps.audio_channels;
    if channel >= channels as i64 {
        return Err(Status::invalid_argument(format!(
            "channel {} is outside the {} declared channels",
            channel, channels
        )));
    }
    Ok(channel as u32)
}

fn audio_load(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let path = text(args, 0);
    env.state.handles.sounds.ensure_room()?;
    let bytes = env.namespace.read_file(path)?.len() as u64;
    let sound = env.state.handles.sounds.insert(SoundAsset {
        path: path.to_string(),
        bytes,
    })?;
    env.state.commands.push_audio(AudioCommand::Load {
        sound,
        path: path.to_string(),
    });
    Ok(Value::Int(sound))
}

fn audio_play(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let channel = check_channel(env, int(args, 1))?;
    env.state.commands.push_audio(AudioCommand::Play {
        sound: int(args, 0),
        channel,
        volume: float(args, 2),
        looped: args[3].as_bool().unwrap_or_default(),
    });
    Ok(Value::Null)
}

fn audio_stop(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let channel = check_channel(env, int(args, 0))?;
    env.state.commands.push_audio(AudioCommand::Stop { channel });
    Ok(Value::Null)
}

fn audio_free(env: &mut CallEnv<'_>, args: &[Value]) -> Result<Value> {
    let sound = int(args, 0);
    env.state.handles.sounds.remove(sound);
    env.state.commands.push_audio(AudioCommand::Free { sound });
    Ok(Value::Null)
}
