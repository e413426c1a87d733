//! Frozen input snapshots
//!
//! The scheduler freezes one [`InputSnapshot`] per update and hands it to the
//! script host. Snapshots come from an [`InputSource`]: the platform layer in
//! a real session, or an [`InputPlayback`] when replaying a recording.

use crate::Tick;
use serde::{Deserialize, Serialize};

/// Number of tracked keyboard keys
pub const KEY_COUNT: usize = 512;
/// Number of gamepad slots
pub const GAMEPAD_COUNT: usize = 4;
/// Buttons per gamepad
pub const GAMEPAD_BUTTONS: usize = 16;
/// Analog axes per gamepad
pub const GAMEPAD_AXES: usize = 6;
/// Tracked mouse buttons
pub const MOUSE_BUTTONS: usize = 5;

/// Mouse position and buttons
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MouseState {
    pub x: f32,
    pub y: f32,
    /// One bit per button
    pub buttons: u8,
    pub wheel: f32,
}

/// State of one gamepad
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GamepadState {
    pub connected: bool,
    /// One bit per button
    pub buttons: u16,
    /// Sticks and triggers in `[-1, 1]`
    pub axes: [f32; GAMEPAD_AXES],
}

/// Input state frozen for one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    /// Key bitset, 64 keys per word
    keys: [u64; KEY_COUNT / 64],
    pub mouse: MouseState,
    pub gamepads: [GamepadState; GAMEPAD_COUNT],
}

impl InputSnapshot {
    /// A snapshot with nothing pressed
    pub fn idle() -> Self {
        Self::default()
    }

    /// Check a key; out-of-range codes read as released
    pub fn key_down(&self, code: usize) -> bool {
        code < KEY_COUNT && self.keys[code / 64] & (1 << (code % 64)) != 0
    }

    /// Set a key; out-of-range codes are ignored
    pub fn set_key(&mut self, code: usize, down: bool) {
        if code >= KEY_COUNT {
            return;
        }
        let bit = 1u64 << (code % 64);
        if down {
            self.keys[code / 64] |= bit;
        } else {
            self.keys[code / 64] &= !bit;
        }
    }

    pub fn button_down(&self, pad: usize, button: usize) -> bool {
        pad < GAMEPAD_COUNT
            && button < GAMEPAD_BUTTONS
            && self.gamepads[pad].buttons & (1 << button) != 0
    }

    pub fn axis(&self, pad: usize, axis: usize) -> f32 {
        if pad < GAMEPAD_COUNT && axis < GAMEPAD_AXES {
            self.gamepads[pad].axes[axis]
        } else {
            0.0
        }
    }

    pub fn mouse_button_down(&self, button: usize) -> bool {
        button < MOUSE_BUTTONS && self.mouse.buttons & (1 << button) != 0
    }
}

/// Producer of frozen input snapshots
pub trait InputSource {
    /// Freeze the input for the given tick
    fn snapshot(&mut self, tick: Tick) -> InputSnapshot;
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
    fn snapshot(&mut self, tick: Tick) -> InputSnapshot {
        (**self).snapshot(tick)
    }
}

/// A source backed by a closure
pub struct FnInput<F>(pub F);

impl<F> InputSource for FnInput<F>
where
    F: FnMut(Tick) -> InputSnapshot,
{
    fn snapshot(&mut self, tick: Tick) -> InputSnapshot {
        (self.0)(tick)
    }
}

/// A source with nothing ever pressed
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleInput;

impl InputSource for IdleInput {
    fn snapshot(&mut self, _tick: Tick) -> InputSnapshot {
        InputSnapshot::idle()
    }
}

/// A snapshot tagged with the tick it was frozen for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    pub tick: Tick,
    pub snapshot: InputSnapshot,
}

/// An ordered sequence of recorded frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputRecording {
    pub frames: Vec<InputFrame>,
    /// True if the recorder ran out of capacity
    #[serde(default)]
    pub truncated: bool,
}

/// Wraps a source and, while recording, keeps every snapshot it produces
///
/// A recording holds at most `capacity` frames; later frames are not stored
/// and the recording is marked truncated. The wrapped source keeps working.
#[derive(Debug)]
pub struct InputRecorder<S> {
    source: S,
    recording: Option<InputRecording>,
    capacity: usize,
}

impl<S: InputSource> InputRecorder<S> {
    /// Wrap a source without recording
    pub fn new(source: S) -> Self {
        Self {
            source,
            recording: None,
            capacity: 0,
        }
    }

    /// Wrap a source and start recording immediately
    pub fn recording(source: S, capacity: usize) -> Self {
        let mut recorder = Self::new(source);
        recorder.start(capacity);
        recorder
    }

    /// Start a fresh recording, discarding any previous one
    pub fn start(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.recording = Some(InputRecording::default());
    }

    /// Stop recording and return what was captured
    pub fn stop(&mut self) -> Option<InputRecording> {
        self.recording.take()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Get the number of recorded frames
    pub fn len(&self) -> usize {
        self.recording.as_ref().map_or(0, |r| r.frames.len())
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the wrapped source, keeping the recording
    pub fn set_source(&mut self, source: S) {
        self.source = source;
    }
}

impl<S: InputSource> InputSource for InputRecorder<S> {
    fn snapshot(&mut self, tick: Tick) -> InputSnapshot {
        let snapshot = self.source.snapshot(tick);
        if let Some(recording) = self.recording.as_mut() {
            if recording.frames.len() < self.capacity {
                recording.frames.push(InputFrame { tick, snapshot });
            } else {
                recording.truncated = true;
            }
        }
        snapshot
    }
}

/// Replays a recording
///
/// Ticks that were not recorded read as idle input.
#[derive(Debug, Clone)]
pub struct InputPlayback {
    frames: Vec<InputFrame>,
    cursor: usize,
}

impl InputPlayback {
    pub fn new(recording: InputRecording) -> Self {
        let mut frames = recording.frames;
        frames.sort_by_key(|f| f.tick);
        Self { frames, cursor: 0 }
    }

    /// Check if every recorded frame was consumed
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.frames.len()
    }

    /// Rewind to the first frame
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl InputSource for InputPlayback {
    fn snapshot(&mut self, tick: Tick) -> InputSnapshot {
        // Ticks only move forward during a session, but a rewound or
        // restarted runtime may ask for an earlier tick
        if self.cursor > 0 && self.frames[self.cursor - 1].tick >= tick {
            self.cursor = self.frames.partition_point(|f| f.tick < tick);
        }
        while self.frames.get(self.cursor).is_some_and(|f| f.tick < tick) {
            self.cursor += 1;
        }
        match self.frames.get(self.cursor) {
            Some(frame) if frame.tick == tick => {
                self.cursor += 1;
                frame.snapshot
            }
            _ => InputSnapshot::idle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pressed(code: usize) -> InputSnapshot {
        let mut snapshot = InputSnapshot::idle();
        snapshot.set_key(code, true);
        snapshot
    }

    #[test]
    fn test_keys() {
        let mut snapshot = InputSnapshot::idle();
        snapshot.set_key(0, true);
        snapshot.set_key(511, true);
        snapshot.set_key(512, true);
        assert!(snapshot.key_down(0));
        assert!(snapshot.key_down(511));
        assert!(!snapshot.key_down(512));
        assert!(!snapshot.key_down(usize::MAX));

        snapshot.set_key(0, false);
        assert!(!snapshot.key_down(0));
    }

    #[test]
    fn test_gamepad_bounds() {
        let mut snapshot = InputSnapshot::idle();
        snapshot.gamepads[1].buttons = 0b100;
        snapshot.gamepads[1].axes[5] = -0.5;
        assert!(snapshot.button_down(1, 2));
        assert!(!snapshot.button_down(1, 16));
        assert!(!snapshot.button_down(4, 2));
        assert_eq!(snapshot.axis(1, 5), -0.5);
        assert_eq!(snapshot.axis(1, 6), 0.0);
    }

    #[test]
    fn test_record_and_playback() {
        let source = FnInput(|tick: Tick| pressed(tick as usize));
        let mut recorder = InputRecorder::recording(source, 16);
        for tick in 0..5 {
            recorder.snapshot(tick);
        }
        assert_eq!(recorder.len(), 5);

        let mut playback = InputPlayback::new(recorder.stop().unwrap());
        for tick in 0..5 {
            assert_eq!(playback.snapshot(tick), pressed(tick as usize));
        }
        assert!(playback.is_finished());
        assert_eq!(playback.snapshot(5), InputSnapshot::idle());
    }

    #[test]
    fn test_recorder_capacity() {
        let mut recorder = InputRecorder::recording(IdleInput, 3);
        for tick in 0..5 {
            recorder.snapshot(tick);
        }
        let recording = recorder.stop().unwrap();
        assert_eq!(recording.frames.len(), 3);
        assert!(recording.truncated);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_recorder_passthrough() {
        let mut recorder: InputRecorder<Box<dyn InputSource>> =
            InputRecorder::new(Box::new(FnInput(|_| pressed(1))));
        assert_eq!(recorder.snapshot(0), pressed(1));
        assert!(recorder.is_empty());
        assert!(recorder.stop().is_none());
    }

    #[test]
    fn test_playback_gaps_and_rewind() {
        let recording = InputRecording {
            frames: vec![
                InputFrame {
                    tick: 2,
                    snapshot: pressed(2),
                },
                InputFrame {
                    tick: 5,
                    snapshot: pressed(5),
                },
            ],
            truncated: false,
        };
        let mut playback = InputPlayback::new(recording);
        assert_eq!(playback.snapshot(0), InputSnapshot::idle());
        assert_eq!(playback.snapshot(2), pressed(2));
        assert_eq!(playback.snapshot(3), InputSnapshot::idle());
        assert_eq!(playback.snapshot(5), pressed(5));

        // Asking for an earlier tick seeks back
        assert_eq!(playback.snapshot(2), pressed(2));
        playback.rewind();
        assert_eq!(playback.snapshot(5), pressed(5));
    }

    #[test]
    fn test_recording_ron_roundtrip() {
        let recording = InputRecording {
            frames: vec![InputFrame {
                tick: 7,
                snapshot: pressed(300),
            }],
            truncated: false,
        };
        let text = ron::to_string(&recording).unwrap();
        let back: InputRecording = ron::from_str(&text).unwrap();
        assert_eq!(back, recording);
    }
}
