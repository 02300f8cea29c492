//! Key and value primitives shared by the cache, store and query layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of an entity within its segment.
///
/// Serialized untagged so the wire form is a bare JSON number or string, matching
/// the invalidation message contract. Ordering follows the natural key order used
/// by cursor pagination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Text(String),
}

impl PrimaryKey {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PrimaryKey::Int(value) => Some(*value),
            PrimaryKey::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PrimaryKey::Int(_) => None,
            PrimaryKey::Text(value) => Some(value),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Int(value) => write!(f, "{value}"),
            PrimaryKey::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey::Int(value)
    }
}

impl From<i32> for PrimaryKey {
    fn from(value: i32) -> Self {
        PrimaryKey::Int(value.into())
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey::Text(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey::Text(value.to_string())
    }
}

/// Scalar column value used in filter conditions and in-memory ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl From<PrimaryKey> for Value {
    fn from(key: PrimaryKey) -> Self {
        match key {
            PrimaryKey::Int(value) => Value::Int(value),
            PrimaryKey::Text(value) => Value::Text(value),
        }
    }
}

impl From<&PrimaryKey> for Value {
    fn from(key: &PrimaryKey) -> Self {
        key.clone().into()
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
