//! Keys, their total order, and key path extraction from JSON records.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

/// A primary or index key.
///
/// Keys of different kinds order as `Number < Text < Array`. Numbers compare
/// numerically, text by its UTF-8 bytes and arrays element by element, a
/// shorter array sorting before any array it prefixes.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    Text(String),
    Array(Vec<Key>),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Text(_) => 1,
            Key::Array(_) => 2,
        }
    }

    /// Converts a JSON value into a key.
    ///
    /// Returns `None` for values that cannot act as keys: null, booleans,
    /// objects, and arrays containing any of those.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().map(Key::from),
            Value::String(s) => Some(Key::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            Value::Null | Value::Bool(_) | Value::Object(_) => None,
        }
    }

    /// Returns false if the key contains a NaN anywhere.
    pub fn is_valid(&self) -> bool {
        match self {
            Key::Number(n) => !n.is_nan(),
            Key::Text(_) => true,
            Key::Array(items) => items.iter().all(Key::is_valid),
        }
    }
}

/// Treats `-0.0` and `0.0` as the same key.
pub(crate) fn normalize_number(n: f64) -> f64 {
    if n == 0.0 { 0.0 } else { n }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => {
                normalize_number(*a).total_cmp(&normalize_number(*b))
            }
            (Key::Text(a), Key::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Text(s) => write!(f, "{:?}", s),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(normalize_number(n))
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

/// Reads the key at a dotted key path such as `"profile.age"`.
///
/// An empty path designates the record itself. Returns `None` when a segment
/// is missing or the value found there is not a valid key.
pub(crate) fn extract_key(record: &Value, key_path: &str) -> Option<Key> {
    let mut current = record;
    if !key_path.is_empty() {
        for segment in key_path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
    }
    Key::from_value(current)
}
