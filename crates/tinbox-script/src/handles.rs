//! Generational handle pools
//!
//! Scripts only ever see integer handle ids: `generation << 16 | index`.
//! Freeing a slot bumps its generation, so a stale or forged id never reaches
//! a live object. Generations start at 1, which keeps 0 and negative ids
//! permanently invalid.

use serde::{Deserialize, Serialize};
use std::fmt;
use tinbox_core::{Result, Status};

/// Most live objects per pool
pub const MAX_HANDLES: usize = 4096;

/// What a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    Image,
    Sound,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Image => f.write_str("image"),
            HandleKind::Sound => f.write_str("sound"),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

/// A pool of objects addressed by generational ids
#[derive(Debug, Clone)]
pub struct HandlePool<T> {
    kind: HandleKind,
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
    live: usize,
}

impl<T> HandlePool<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Fail if no handle can be handed out
    ///
    /// Callers that must do costly work before [`insert`](Self::insert)
    /// check here first.
    pub fn ensure_room(&self) -> Result<()> {
        if self.free.is_empty() && self.slots.len() >= MAX_HANDLES {
            return Err(Status::resource_exhausted(format!(
                "{} pool is full ({} handles)",
                self.kind, MAX_HANDLES
            )));
        }
        Ok(())
    }

    /// Store a value and return its id
    pub fn insert(&mut self, value: T) -> Result<i64> {
        self.ensure_room()?;
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    value: None,
                });
                (self.slots.len() - 1) as u16
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.live += 1;
        Ok(encode(slot.generation, index))
    }

    pub fn get(&self, id: i64) -> Option<&T> {
        let (generation, index) = decode(id)?;
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.get(id).is_some()
    }

    /// Free a handle; stale ids return `None` and change nothing
    pub fn remove(&mut self, id: i64) -> Option<T> {
        let (generation, index) = decode(id)?;
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.free.push(index);
        self.live -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate live `(id, value)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (i64, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (encode(slot.generation, index as u16), value))
        })
    }
}

fn encode(generation: u16, index: u16) -> i64 {
    ((generation as i64) << 16) | index as i64
}

fn decode(id: i64) -> Option<(u16, u16)> {
    if !(0..=u32::MAX as i64).contains(&id) {
        return None;
    }
    Some(((id >> 16) as u16, (id & 0xFFFF) as u16))
}

/// An image loaded by a cartridge; decoding happens outside the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub path: String,
    pub bytes: u64,
}

/// A sound loaded by a cartridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundAsset {
    pub path: String,
    pub bytes: u64,
}

/// Every pool owned by one VM
#[derive(Debug, Clone)]
pub struct HandleTables {
    pub images: HandlePool<ImageAsset>,
    pub sounds: HandlePool<SoundAsset>,
}

impl HandleTables {
    pub fn new() -> Self {
        Self {
            images: HandlePool::new(HandleKind::Image),
            sounds: HandlePool::new(HandleKind::Sound),
        }
    }

    /// Check if `id` is a live handle of `kind`
    pub fn is_live(&self, kind: HandleKind, id: i64) -> bool {
        match kind {
            HandleKind::Image => self.images.contains(id),
            HandleKind::Sound => self.sounds.contains(id),
        }
    }

    /// Every live id, images first
    pub fn ids(&self) -> Vec<(HandleKind, i64)> {
        let images = self.images.iter().map(|(id, _)| (HandleKind::Image, id));
        let sounds = self.sounds.iter().map(|(id, _)| (HandleKind::Sound, id));
        images.chain(sounds).collect()
    }

    pub fn len(&self) -> usize {
        self.images.len() + self.sounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTables {
    fn default() -> Self {
        Self::new()
    }
}
