//! `tinbox` - run a cartridge headless

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tinbox_core::{InputPlayback, InputRecording};
use tinbox_runtime::{logging, Runtime, RuntimeConfig, DEFAULT_RECORDING_CAPACITY};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tinbox", version, about = "Run a tinbox cartridge")]
struct Cli {
    /// Cartridge directory (holds cartridge.toml)
    cartridge: PathBuf,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// RON runtime config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run this many fixed updates, then stop
    #[arg(long)]
    ticks: Option<u64>,

    /// RNG seed (overrides the config)
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for save data (overrides the config)
    #[arg(long)]
    save_root: Option<PathBuf>,

    /// Write the frozen input of every update to this RON file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Feed input from a recording made with --record
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Counts {
    draw: usize,
    audio: usize,
}

impl Counts {
    fn collect(&mut self, runtime: &mut Runtime) {
        let commands = runtime.take_commands();
        self.draw += commands.draw.len();
        self.audio += commands.audio.len();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(save_root) = &cli.save_root {
        config.save_root = save_root.clone();
    }

    let mut runtime = Runtime::new(config).context("invalid runtime config")?;
    if let Some(path) = &cli.replay {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recording {}", path.display()))?;
        let recording: InputRecording = ron::from_str(&text)
            .with_context(|| format!("failed to parse recording {}", path.display()))?;
        info!(frames = recording.frames.len(), "replaying input");
        runtime.set_input(InputPlayback::new(recording));
    }
    if cli.record.is_some() {
        let capacity = cli
            .ticks
            .map_or(DEFAULT_RECORDING_CAPACITY, |ticks| ticks as usize);
        runtime.start_recording(capacity);
    }

    runtime
        .load_cartridge(&cli.cartridge)
        .with_context(|| format!("failed to load {}", cli.cartridge.display()))?;

    let mut counts = Counts::default();
    let outcome = match cli.ticks {
        Some(ticks) => run_headless(&mut runtime, ticks, &mut counts),
        None => run_realtime(&mut runtime, &mut counts),
    };

    let tick = runtime.current_tick().unwrap_or(0);
    let hash = runtime.state_hash();
    runtime.shutdown();

    if let Some(path) = &cli.record {
        let recording = runtime.stop_recording().unwrap_or_default();
        if recording.truncated {
            tracing::warn!("recording truncated at {} frames", recording.frames.len());
        }
        let text = ron::ser::to_string_pretty(&recording, ron::ser::PrettyConfig::default())
            .context("failed to serialize recording")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write recording {}", path.display()))?;
        info!(frames = recording.frames.len(), path = %path.display(), "recording saved");
    }

    outcome?;
    match hash {
        Some(hash) => println!("tick {} hash {:016x}", tick, hash),
        None => println!("tick {} hash -", tick),
    }
    println!("draw {} audio {}", counts.draw, counts.audio);
    Ok(())
}

fn run_headless(runtime: &mut Runtime, ticks: u64, counts: &mut Counts) -> Result<()> {
    for _ in 0..ticks {
        if !runtime.is_running() {
            break;
        }
        runtime.tick()?;
        counts.collect(runtime);
    }
    Ok(())
}

fn run_realtime(runtime: &mut Runtime, counts: &mut Counts) -> Result<()> {
    let period = Duration::from_secs_f64(1.0 / runtime.config().tick_hz as f64);
    let mut last = Instant::now();
    while runtime.is_running() {
        let now = Instant::now();
        let report = runtime.frame(now.duration_since(last).as_secs_f64())?;
        last = now;
        counts.collect(runtime);
        if report.dropped > 0.0 {
            tracing::debug!(dropped = report.dropped, "running behind");
        }
        std::thread::sleep(period.saturating_sub(now.elapsed()));
    }
    Ok(())
}
