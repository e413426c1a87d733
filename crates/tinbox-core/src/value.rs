//! Dynamic values flowing between cartridge scripts and the host
//!
//! Values are what scripts store in globals, pass to native bindings and get
//! back from them. [`Value::footprint`] estimates the bytes a value occupies so
//! VM memory can be charged against the resource budget.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Script data
///
/// Ints carry counts, colors and handle ids; floats carry coordinates and
/// volumes. Bindings that take a float also accept an int.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(ValueMap),
}

/// Script globals and map values, kept in insertion order
pub type ValueMap = IndexMap<String, Value>;

/// Bytes charged for any value before its contents
const SLOT: u64 = std::mem::size_of::<Value>() as u64;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Numeric view; ints widen to float
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Name used in script-visible type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Condition semantics for `If`, `And`, `Or` and `Not`
    ///
    /// Null, false, zero, NaN and empty containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }

    /// Estimated bytes held by this value
    ///
    /// Every value costs one slot; strings add their length, containers add
    /// their elements and map keys. The estimate only has to be the same on
    /// every run, not exact.
    pub fn footprint(&self) -> u64 {
        let contents = match self {
            Value::String(s) => s.len() as u64,
            Value::List(items) => items.iter().map(Value::footprint).sum(),
            Value::Map(entries) => entries
                .iter()
                .map(|(key, value)| key.len() as u64 + value.footprint())
                .sum(),
            _ => 0,
        };
        SLOT + contents
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

value_from! {
    bool => Bool as bool,
    i32 => Int as i64,
    i64 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => String as String,
    &str => String as String,
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<ValueMap> for Value {
    fn from(entries: ValueMap) -> Self {
        Value::Map(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Float(0.5).as_int(), None);
        assert_eq!(Value::Int(42).as_float(), Some(42.0));
        assert_eq!(Value::String("cart:/a".into()).as_str(), Some("cart:/a"));
        assert_eq!(Value::List(vec![]).type_name(), "list");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::Float(f64::NAN).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
    }

    #[test]
    fn test_footprint() {
        assert_eq!(Value::Int(7).footprint(), SLOT);
        assert_eq!(Value::String("abcd".into()).footprint(), SLOT + 4);

        let list = Value::from(vec![Value::Int(1), Value::from("xy")]);
        assert_eq!(list.footprint(), 3 * SLOT + 2);

        let mut entries = ValueMap::new();
        entries.insert("key".to_string(), Value::Bool(true));
        assert_eq!(Value::from(entries).footprint(), 2 * SLOT + 3);
    }

    #[test]
    fn test_display() {
        let mut entries = ValueMap::new();
        entries.insert("name".to_string(), Value::from("a\"b"));
        let value = Value::from(vec![Value::Int(1), Value::Null, Value::Map(entries)]);
        assert_eq!(value.to_string(), r#"[1, null, {name: "a\"b"}]"#);
    }

    #[test]
    fn test_from() {
        assert_eq!(Value::from(3u32), Value::Int(3));
        assert_eq!(Value::from(1.5f32), Value::Float(1.5));
        assert_eq!(Value::from(vec![1i64, 2]), Value::List(vec![Value::Int(1), Value::Int(2)]));
    }
}
