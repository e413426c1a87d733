//! Explicit logging context with a bounded record ring
//!
//! There is no process-wide log state. The runtime owns a [`LogContext`],
//! clones it into the components that log, and every record is both emitted
//! through `tracing` and kept in a [`LogRing`] so diagnostics can be shown to
//! the user after a fault.
//!
//! # Example
//!
//! ```rust
//! use tinbox_core::log::{LogContext, LogLevel, LogRing};
//!
//! let log = LogContext::new(LogRing::new(2)).for_cartridge("demo");
//! log.info("loaded");
//! log.warn("slow update");
//! log.error("update failed");
//!
//! // The oldest record was evicted
//! let records = log.records();
//! assert_eq!(records.len(), 2);
//! assert_eq!(records[0].message, "slow update");
//! assert_eq!(records[1].level, LogLevel::Error);
//! assert_eq!(records[1].cartridge.as_deref(), Some("demo"));
//! ```

use crate::Tick;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Default number of records kept
pub const DEFAULT_LOG_CAPACITY: usize = 256;

/// Severity of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// The cartridge session ended
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// One log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the overall stream, including evicted records
    pub seq: u64,
    pub level: LogLevel,
    pub cartridge: Option<String>,
    pub tick: Option<Tick>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A ring buffer of recent log records
///
/// Bounded memory: once full, each new record evicts the oldest one.
#[derive(Debug)]
pub struct LogRing {
    /// Ring storage; `None` means the slot was never written
    records: Vec<Option<LogRecord>>,
    /// Next write position
    head: usize,
    /// Records currently stored
    count: usize,
    /// Records written so far, including evicted ones
    written: u64,
}

impl LogRing {
    /// Create a ring holding at most `capacity` records (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: (0..capacity).map(|_| None).collect(),
            head: 0,
            count: 0,
            written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Records evicted to make room
    pub fn evicted(&self) -> u64 {
        self.written - self.count as u64
    }

    /// Store a record, assigning its sequence number
    pub fn push(&mut self, mut record: LogRecord) {
        record.seq = self.written;
        self.records[self.head] = Some(record);
        self.head = (self.head + 1) % self.capacity();
        self.count = (self.count + 1).min(self.capacity());
        self.written += 1;
    }

    /// Iterate records from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        let capacity = self.capacity();
        let start = (self.head + capacity - self.count) % capacity;
        (0..self.count).filter_map(move |i| self.records[(start + i) % capacity].as_ref())
    }

    /// Most recent record
    pub fn last(&self) -> Option<&LogRecord> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.capacity();
        self.records[(self.head + capacity - 1) % capacity].as_ref()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.records {
            *slot = None;
        }
        self.head = 0;
        self.count = 0;
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Handle used by components to log with cartridge context
///
/// Clones share the same ring.
#[derive(Debug, Clone)]
pub struct LogContext {
    ring: Rc<RefCell<LogRing>>,
    cartridge: Option<Rc<str>>,
}

impl LogContext {
    /// Create a context writing into `ring`
    pub fn new(ring: LogRing) -> Self {
        Self {
            ring: Rc::new(RefCell::new(ring)),
            cartridge: None,
        }
    }

    /// A context sharing this ring, tagging records with a cartridge id
    pub fn for_cartridge(&self, id: &str) -> Self {
        Self {
            ring: Rc::clone(&self.ring),
            cartridge: Some(Rc::from(id)),
        }
    }

    /// A context sharing this ring without cartridge tagging
    pub fn host(&self) -> Self {
        Self {
            ring: Rc::clone(&self.ring),
            cartridge: None,
        }
    }

    pub fn cartridge(&self) -> Option<&str> {
        self.cartridge.as_deref()
    }

    /// Record a message
    pub fn log(&self, level: LogLevel, tick: Option<Tick>, message: impl Into<String>) {
        let message = message.into();
        let cartridge = self.cartridge.as_deref().unwrap_or("-");
        match level {
            LogLevel::Trace => tracing::trace!(cartridge, tick, "{}", message),
            LogLevel::Debug => tracing::debug!(cartridge, tick, "{}", message),
            LogLevel::Info => tracing::info!(cartridge, tick, "{}", message),
            LogLevel::Warn => tracing::warn!(cartridge, tick, "{}", message),
            LogLevel::Error => tracing::error!(cartridge, tick, "{}", message),
            LogLevel::Fatal => tracing::error!(cartridge, tick, fatal = true, "{}", message),
        }
        self.ring.borrow_mut().push(LogRecord {
            seq: 0,
            level,
            cartridge: self.cartridge.as_deref().map(str::to_string),
            tick,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, None, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, None, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, None, message);
    }

    /// Copy of the stored records, oldest first
    pub fn records(&self) -> Vec<LogRecord> {
        self.ring.borrow().iter().cloned().collect()
    }

    /// Most recent record at or above `level`
    pub fn last_at_least(&self, level: LogLevel) -> Option<LogRecord> {
        self.ring
            .borrow()
            .iter()
            .filter(|r| r.level >= level)
            .last()
            .cloned()
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new(LogRing::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            seq: 0,
            level: LogLevel::Info,
            cartridge: None,
            tick: None,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_ring_eviction_order() {
        let mut ring = LogRing::new(3);
        for i in 0..5 {
            ring.push(record(&format!("m{}", i)));
        }
        let messages: Vec<_> = ring.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["m2", "m3", "m4"]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.evicted(), 2);
        assert_eq!(ring.last().unwrap().seq, 4);
    }

    #[test]
    fn test_ring_partial_fill() {
        let mut ring = LogRing::new(4);
        assert!(ring.last().is_none());
        ring.push(record("a"));
        ring.push(record("b"));
        let seqs: Vec<_> = ring.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1]);

        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.iter().count(), 0);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut ring = LogRing::new(0);
        ring.push(record("only"));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_contexts_share_ring() {
        let host = LogContext::new(LogRing::new(8));
        let cart = host.for_cartridge("cart-a");
        host.info("host message");
        cart.log(LogLevel::Warn, Some(12), "cart message");

        let records = host.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cartridge, None);
        assert_eq!(records[1].cartridge.as_deref(), Some("cart-a"));
        assert_eq!(records[1].tick, Some(12));

        let warn = host.last_at_least(LogLevel::Warn).unwrap();
        assert_eq!(warn.message, "cart message");
        assert!(host.last_at_least(LogLevel::Error).is_none());
        assert_eq!(cart.host().cartridge(), None);
    }
}
