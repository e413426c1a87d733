//! Deterministic hashing of simulation state
//!
//! Replays are verified by comparing state hashes tick by tick, so these
//! functions must produce the same output for the same inputs across runs.
//! `std::collections::hash_map::DefaultHasher` uses random keys and cannot be
//! used here.
//!
//! # Example
//!
//! ```
//! use tinbox_core::hash::{hash_value_with_seed, StateHasher, DEFAULT_HASH_SEED};
//! use tinbox_core::Value;
//!
//! let v = Value::String("score".into());
//! assert_eq!(
//!     hash_value_with_seed(&v, DEFAULT_HASH_SEED),
//!     hash_value_with_seed(&v, DEFAULT_HASH_SEED)
//! );
//!
//! let mut hasher = StateHasher::new(DEFAULT_HASH_SEED);
//! hasher.write_u64(7).write_value(&v);
//! let h = hasher.finish();
//! ```

use crate::rng::splitmix64;
use crate::Value;

/// Seed used for state hashes unless a caller picks another one
pub const DEFAULT_HASH_SEED: u64 = 0x7462_6F78_5F73_7461;

// Type discriminators for Value hashing
const TYPE_NULL: u64 = 0;
const TYPE_BOOL: u64 = 1;
const TYPE_INT: u64 = 2;
const TYPE_FLOAT: u64 = 3;
const TYPE_STRING: u64 = 4;
const TYPE_LIST: u64 = 5;
const TYPE_MAP: u64 = 6;

/// Mix a seed with two words into a well-distributed 64-bit value
///
/// Each word goes through its own splitmix64 round, so swapping `a` and `b`
/// changes the result.
pub fn hash_seed(seed: u64, a: u64, b: u64) -> u64 {
    let h = splitmix64(seed ^ splitmix64(a));
    splitmix64(h ^ splitmix64(b.wrapping_add(0x632B_E59B_D9B4_E019)))
}

/// Hash a u64 value with a seed
pub fn hash_u64_with_seed(value: u64, seed: u64) -> u64 {
    hash_seed(seed, value, 0)
}

/// Hash a byte slice with a seed
///
/// FNV-1a over the bytes with the seed as initial state, remixed through
/// [`hash_seed`] every eight bytes and once more with the length.
pub fn hash_bytes_with_seed(bytes: &[u8], seed: u64) -> u64 {
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut h = seed;
    for (i, &b) in bytes.iter().enumerate() {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
        if i % 8 == 7 {
            h = hash_seed(seed, h, i as u64);
        }
    }
    hash_seed(seed, h, bytes.len() as u64)
}

/// Hash a [`Value`] with a seed
///
/// Each value type is tagged with a discriminator, so `Int(0)` and
/// `Bool(false)` hash differently. Maps are hashed in sorted key order and
/// therefore do not depend on insertion order.
pub fn hash_value_with_seed(value: &Value, seed: u64) -> u64 {
    match value {
        Value::Null => hash_seed(seed, TYPE_NULL, 0),
        Value::Bool(b) => {
            let h = hash_seed(seed, TYPE_BOOL, 0);
            hash_seed(h, *b as u64, 1)
        }
        Value::Int(i) => {
            let h = hash_seed(seed, TYPE_INT, 0);
            hash_seed(h, *i as u64, 1)
        }
        Value::Float(f) => {
            let h = hash_seed(seed, TYPE_FLOAT, 0);
            hash_seed(h, f.to_bits(), 1)
        }
        Value::String(s) => {
            let h = hash_seed(seed, TYPE_STRING, 0);
            hash_seed(h, hash_bytes_with_seed(s.as_bytes(), h), 1)
        }
        Value::List(list) => {
            let mut h = hash_seed(seed, TYPE_LIST, list.len() as u64);
            for (i, v) in list.iter().enumerate() {
                h = hash_seed(h, hash_value_with_seed(v, h), i as u64 + 1);
            }
            h
        }
        Value::Map(map) => {
            let mut h = hash_seed(seed, TYPE_MAP, map.len() as u64);
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (i, (k, v)) in entries.into_iter().enumerate() {
                let key_hash = hash_bytes_with_seed(k.as_bytes(), h);
                let val_hash = hash_value_with_seed(v, h);
                h = hash_seed(h, key_hash, i as u64 * 2 + 1);
                h = hash_seed(h, val_hash, i as u64 * 2 + 2);
            }
            h
        }
    }
}

/// Incremental hasher for a sequence of state components
///
/// The order of writes matters: the same components written in a different
/// order give a different hash.
#[derive(Debug, Clone)]
pub struct StateHasher {
    state: u64,
    count: u64,
}

impl StateHasher {
    /// Start a new hash
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed,
            count: 0,
        }
    }

    fn absorb(&mut self, word: u64) -> &mut Self {
        self.count += 1;
        self.state = hash_seed(self.state, word, self.count);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.absorb(value)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let h = hash_bytes_with_seed(bytes, self.state);
        self.absorb(h)
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_bytes(s.as_bytes())
    }

    pub fn write_value(&mut self, value: &Value) -> &mut Self {
        let h = hash_value_with_seed(value, self.state);
        self.absorb(h)
    }

    /// Get the final hash
    pub fn finish(&self) -> u64 {
        hash_seed(self.state, self.count, TYPE_MAP + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueMap;

    #[test]
    fn test_hash_bytes() {
        let h1 = hash_bytes_with_seed(b"hello", DEFAULT_HASH_SEED);
        let h2 = hash_bytes_with_seed(b"hello", DEFAULT_HASH_SEED);
        assert_eq!(h1, h2);
        assert_ne!(h1, hash_bytes_with_seed(b"world", DEFAULT_HASH_SEED));
        assert_ne!(h1, hash_bytes_with_seed(b"hello", 1));
        assert_ne!(
            hash_bytes_with_seed(b"", DEFAULT_HASH_SEED),
            hash_bytes_with_seed(b"\0", DEFAULT_HASH_SEED)
        );
    }

    #[test]
    fn test_hash_value_type_discrimination() {
        assert_ne!(
            hash_value_with_seed(&Value::Int(0), DEFAULT_HASH_SEED),
            hash_value_with_seed(&Value::Bool(false), DEFAULT_HASH_SEED)
        );
        assert_ne!(
            hash_value_with_seed(&Value::Null, DEFAULT_HASH_SEED),
            hash_value_with_seed(&Value::Int(0), DEFAULT_HASH_SEED)
        );
        assert_ne!(
            hash_value_with_seed(&Value::Int(1), DEFAULT_HASH_SEED),
            hash_value_with_seed(&Value::Float(1.0), DEFAULT_HASH_SEED)
        );
    }

    #[test]
    fn test_globals_hash_ignores_insertion_order() {
        let first: ValueMap = [("score", 1), ("lives", 3)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::Int(v)))
            .collect();
        let second: ValueMap = [("lives", 3), ("score", 1)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::Int(v)))
            .collect();

        assert_eq!(
            hash_value_with_seed(&Value::Map(first), DEFAULT_HASH_SEED),
            hash_value_with_seed(&Value::Map(second), DEFAULT_HASH_SEED)
        );
    }

    #[test]
    fn test_hash_value_nested_lists_differ() {
        let a = Value::List(vec![Value::List(vec![]), Value::Int(1)]);
        let b = Value::List(vec![Value::List(vec![Value::Int(1)])]);
        assert_ne!(
            hash_value_with_seed(&a, DEFAULT_HASH_SEED),
            hash_value_with_seed(&b, DEFAULT_HASH_SEED)
        );
    }

    #[test]
    fn test_state_hasher_order_matters() {
        let mut a = StateHasher::new(DEFAULT_HASH_SEED);
        a.write_u64(1).write_u64(2);
        let mut b = StateHasher::new(DEFAULT_HASH_SEED);
        b.write_u64(2).write_u64(1);
        assert_ne!(a.finish(), b.finish());

        let mut c = StateHasher::new(DEFAULT_HASH_SEED);
        c.write_u64(1).write_u64(2);
        assert_eq!(a.finish(), c.finish());
    }

    #[test]
    fn test_state_hasher_empty_vs_written() {
        let empty = StateHasher::new(DEFAULT_HASH_SEED);
        let mut written = StateHasher::new(DEFAULT_HASH_SEED);
        written.write_str("");
        assert_ne!(empty.finish(), written.finish());
    }
}
