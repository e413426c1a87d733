//! Fixed-step time for tick-based simulation
//!
//! - `Tick` - Logical time unit
//! - `TickState` - Tick counter, period and unconsumed frame time
//! - `TickScheduler` - Accumulator loop deciding how many updates run per frame
//!
//! The scheduler caps the number of updates per frame. Time still owed when
//! the cap is reached is dropped, so a slow cartridge falls behind wall-clock
//! time instead of spiralling into ever larger bursts of catch-up updates.

use crate::Status;
use serde::{Deserialize, Serialize};

/// A discrete tick identifier (logical time unit)
pub type Tick = u64;

/// Default simulation rate
pub const DEFAULT_TICK_HZ: u32 = 60;

/// Default cap on updates run in one frame
pub const DEFAULT_MAX_UPDATES_PER_FRAME: u32 = 4;

/// Longest frame time accepted, in seconds; longer frames are clamped
pub const DEFAULT_MAX_FRAME_TIME: f64 = 0.25;

/// Lifecycle of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SchedulerState {
    /// Created, not started
    #[default]
    Idle,
    /// Running frames
    Running,
    /// Stopped on request
    Stopped,
    /// Stopped by a fatal update error; needs a reload
    Faulted,
}

/// Tick counter and accumulated time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickState {
    tick: Tick,
    period: f64,
    accumulator: f64,
    updates_this_frame: u32,
}

impl TickState {
    /// Create a tick state for the given rate (at least 1 Hz)
    pub fn new(tick_hz: u32) -> Self {
        Self {
            tick: 0,
            period: 1.0 / tick_hz.max(1) as f64,
            accumulator: 0.0,
            updates_this_frame: 0,
        }
    }

    /// Number of completed updates
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Fixed update period in seconds
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Unconsumed time in seconds
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Updates run during the last frame
    pub fn updates_this_frame(&self) -> u32 {
        self.updates_this_frame
    }
}

/// What happened during one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Updates run this frame
    pub updates: u32,
    /// Time discarded because the update cap was reached, in seconds
    pub dropped: f64,
    /// Interpolation factor for rendering, `accumulator / period` in `[0, 1]`
    pub alpha: f64,
    /// Non-fatal update failures, in order
    pub errors: Vec<Status>,
    /// The fatal failure that faulted the scheduler, if any
    pub fault: Option<Status>,
}

/// Fixed-hertz accumulator loop
///
/// # Example
///
/// ```
/// use tinbox_core::time::{SchedulerState, TickScheduler};
///
/// let mut scheduler = TickScheduler::new(64, 4);
/// scheduler.start().unwrap();
///
/// let mut ticks = Vec::new();
/// let report = scheduler.frame(3.0 / 64.0, |tick, _dt| {
///     ticks.push(tick);
///     Ok(())
/// });
/// assert_eq!(report.updates, 3);
/// assert_eq!(ticks, vec![0, 1, 2]);
/// assert_eq!(scheduler.state(), SchedulerState::Running);
/// ```
#[derive(Debug, Clone)]
pub struct TickScheduler {
    state: SchedulerState,
    ticks: TickState,
    max_updates_per_frame: u32,
    max_frame_time: f64,
}

impl TickScheduler {
    /// Create a scheduler; both arguments are raised to at least 1
    pub fn new(tick_hz: u32, max_updates_per_frame: u32) -> Self {
        Self {
            state: SchedulerState::Idle,
            ticks: TickState::new(tick_hz),
            max_updates_per_frame: max_updates_per_frame.max(1),
            max_frame_time: DEFAULT_MAX_FRAME_TIME,
        }
    }

    /// Set the longest accepted frame time (seconds)
    pub fn with_max_frame_time(mut self, seconds: f64) -> Self {
        if seconds.is_finite() && seconds > 0.0 {
            self.max_frame_time = seconds;
        }
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn tick_state(&self) -> &TickState {
        &self.ticks
    }

    pub fn max_updates_per_frame(&self) -> u32 {
        self.max_updates_per_frame
    }

    /// Move from `Idle` to `Running`
    pub fn start(&mut self) -> crate::Result<()> {
        match self.state {
            SchedulerState::Idle => {
                self.state = SchedulerState::Running;
                Ok(())
            }
            other => Err(Status::failed_precondition(format!(
                "scheduler cannot start from {:?}",
                other
            ))),
        }
    }

    /// Stop a running scheduler; later frames run nothing
    pub fn stop(&mut self) {
        if self.state == SchedulerState::Running {
            self.state = SchedulerState::Stopped;
        }
        self.ticks.accumulator = 0.0;
    }

    /// Advance by `elapsed` seconds of wall-clock time
    ///
    /// `update` is called with the tick number and the fixed period for every
    /// update that fits, up to the per-frame cap. A non-fatal error is
    /// recorded and the loop continues; a fatal one faults the scheduler and
    /// ends the frame.
    pub fn frame<F>(&mut self, elapsed: f64, mut update: F) -> FrameReport
    where
        F: FnMut(Tick, f64) -> crate::Result<()>,
    {
        let mut report = FrameReport::default();
        self.ticks.updates_this_frame = 0;
        if self.state != SchedulerState::Running {
            return report;
        }

        let elapsed = if elapsed.is_finite() {
            elapsed.clamp(0.0, self.max_frame_time)
        } else {
            0.0
        };
        self.ticks.accumulator += elapsed;

        let period = self.ticks.period;
        while self.ticks.accumulator >= period
            && self.ticks.updates_this_frame < self.max_updates_per_frame
        {
            if let Err(status) = update(self.ticks.tick, period) {
                if status.is_fatal() {
                    self.state = SchedulerState::Faulted;
                    self.ticks.accumulator = 0.0;
                    report.updates = self.ticks.updates_this_frame;
                    report.fault = Some(status);
                    return report;
                }
                report.errors.push(status);
            }
            self.ticks.tick += 1;
            self.ticks.accumulator -= period;
            self.ticks.updates_this_frame += 1;
        }

        if self.ticks.accumulator >= period {
            report.dropped = self.ticks.accumulator;
            self.ticks.accumulator = 0.0;
            tracing::debug!(
                tick = self.ticks.tick,
                dropped = report.dropped,
                "update cap reached, dropping frame time"
            );
        }

        report.updates = self.ticks.updates_this_frame;
        report.alpha = (self.ticks.accumulator / period).clamp(0.0, 1.0);
        report
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_HZ, DEFAULT_MAX_UPDATES_PER_FRAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, SimRng};

    fn running(hz: u32, cap: u32) -> TickScheduler {
        let mut scheduler = TickScheduler::new(hz, cap);
        scheduler.start().unwrap();
        scheduler
    }

    #[test]
    fn test_state_machine() {
        let mut scheduler = TickScheduler::default();
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        // Idle schedulers run nothing
        let report = scheduler.frame(1.0, |_, _| panic!("must not run"));
        assert_eq!(report.updates, 0);

        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(
            scheduler.start().unwrap_err().kind(),
            ErrorKind::FailedPrecondition
        );

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        let report = scheduler.frame(1.0, |_, _| panic!("must not run"));
        assert_eq!(report.updates, 0);
    }

    #[test]
    fn test_update_cap_drops_backlog() {
        let mut scheduler = running(60, 4).with_max_frame_time(10.0);
        let period = scheduler.tick_state().period();

        let mut calls = 0;
        let report = scheduler.frame(100.0 * period, |_, dt| {
            assert_eq!(dt, period);
            calls += 1;
            Ok(())
        });

        assert_eq!(calls, 4);
        assert_eq!(report.updates, 4);
        assert!(report.dropped > 90.0 * period);
        assert!(scheduler.tick_state().accumulator() < period);
        assert_eq!(scheduler.tick_state().tick(), 4);

        // The dropped time is not replayed on the next frame
        let report = scheduler.frame(0.0, |_, _| Ok(()));
        assert_eq!(report.updates, 0);
    }

    #[test]
    fn test_long_frames_are_clamped() {
        let mut scheduler = running(64, 100);
        let report = scheduler.frame(5.0, |_, _| Ok(()));
        // 0.25 s at 64 Hz
        assert_eq!(report.updates, 16);
    }

    #[test]
    fn test_partial_periods_accumulate() {
        let mut scheduler = running(8, 4);
        let report = scheduler.frame(0.0625, |_, _| Ok(()));
        assert_eq!(report.updates, 0);
        assert_eq!(report.alpha, 0.5);

        let report = scheduler.frame(0.0625, |_, _| Ok(()));
        assert_eq!(report.updates, 1);
    }

    #[test]
    fn test_invalid_frame_times() {
        let mut scheduler = running(60, 4);
        for elapsed in [f64::NAN, f64::INFINITY, -1.0] {
            let report = scheduler.frame(elapsed, |_, _| Ok(()));
            assert_eq!(report.updates, 0);
        }
        assert_eq!(scheduler.tick_state().accumulator(), 0.0);
    }

    #[test]
    fn test_non_fatal_errors_continue() {
        let mut scheduler = running(64, 4);
        let period = scheduler.tick_state().period();
        let report = scheduler.frame(3.0 * period, |tick, _| {
            if tick == 1 {
                Err(Status::invalid_argument("bad call"))
            } else {
                Ok(())
            }
        });
        assert_eq!(report.updates, 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(scheduler.tick_state().tick(), 3);
    }

    #[test]
    fn test_fatal_error_faults() {
        let mut scheduler = running(60, 4);
        let period = scheduler.tick_state().period();
        let report = scheduler.frame(3.0 * period, |tick, _| {
            if tick == 1 {
                Err(Status::fatal(ErrorKind::Internal, "vm corrupted"))
            } else {
                Ok(())
            }
        });
        assert_eq!(report.updates, 1);
        assert!(report.fault.is_some());
        assert_eq!(scheduler.state(), SchedulerState::Faulted);
        assert_eq!(scheduler.tick_state().accumulator(), 0.0);

        let report = scheduler.frame(1.0, |_, _| panic!("faulted schedulers stay idle"));
        assert_eq!(report.updates, 0);
    }

    #[test]
    fn test_accumulator_bound_with_random_frames() {
        let mut rng = SimRng::new(2024);
        let mut scheduler = running(60, 4);
        let period = scheduler.tick_state().period();

        for _ in 0..1000 {
            let elapsed = rng.next_f64() * 0.3;
            let report = scheduler.frame(elapsed, |_, _| Ok(()));
            assert!(report.updates <= 4);
            assert!(scheduler.tick_state().accumulator() < period);
            assert!((0.0..=1.0).contains(&report.alpha));
        }
    }
}
