//! Draw and audio commands queued by a cartridge
//!
//! The core never renders or plays anything. Bindings append owned commands
//! to a [`CommandBuffer`]; the orchestrator drains it after each frame and
//! hands the batch to whatever renderer or mixer is attached.

use serde::{Deserialize, Serialize};
use tinbox_core::{Result, Status};

/// A 2D drawing command; colors are `0xRRGGBBAA`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawCommand {
    Clear {
        color: u32,
    },
    Rect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        color: u32,
    },
    Line {
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
        color: u32,
    },
    Text {
        x: f64,
        y: f64,
        text: String,
        color: u32,
    },
    Image {
        image: i64,
        path: String,
        x: f64,
        y: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AudioCommand {
    Load {
        sound: i64,
        path: String,
    },
    Play {
        sound: i64,
        channel: u32,
        volume: f64,
        looped: bool,
    },
    Stop {
        channel: u32,
    },
    Free {
        sound: i64,
    },
}

/// Everything queued during one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameCommands {
    pub draw: Vec<DrawCommand>,
    pub audio: Vec<AudioCommand>,
}

impl FrameCommands {
    pub fn is_empty(&self) -> bool {
        self.draw.is_empty() && self.audio.is_empty()
    }
}

/// Position in a buffer, used to roll back a failed update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMark {
    draw: usize,
    audio: usize,
}

/// Per-frame command queue with a draw-call cap
#[derive(Debug, Clone)]
pub struct CommandBuffer {
    pending: FrameCommands,
    max_draw_calls: usize,
}

impl CommandBuffer {
    pub fn new(max_draw_calls: usize) -> Self {
        Self {
            pending: FrameCommands::default(),
            max_draw_calls,
        }
    }

    /// Queue a draw command, refusing it once the frame's cap is reached
    pub fn push_draw(&mut self, command: DrawCommand) -> Result<()> {
        if self.pending.draw.len() >= self.max_draw_calls {
            return Err(Status::resource_exhausted(format!(
                "draw call limit of {} per frame reached",
                self.max_draw_calls
            )));
        }
        self.pending.draw.push(command);
        Ok(())
    }

    pub fn push_audio(&mut self, command: AudioCommand) {
        self.pending.audio.push(command);
    }

    pub fn draw_len(&self) -> usize {
        self.pending.draw.len()
    }

    pub fn audio_len(&self) -> usize {
        self.pending.audio.len()
    }

    pub fn mark(&self) -> CommandMark {
        CommandMark {
            draw: self.pending.draw.len(),
            audio: self.pending.audio.len(),
        }
    }

    /// Drop everything queued after `mark`
    pub fn rollback(&mut self, mark: CommandMark) {
        self.pending.draw.truncate(mark.draw);
        self.pending.audio.truncate(mark.audio);
    }

    /// Take the frame's commands, leaving the buffer empty
    pub fn drain(&mut self) -> FrameCommands {
        std::mem::take(&mut self.pending)
    }
}
