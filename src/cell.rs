//! # Attributes, cells and their values
//!
//! The identity model of the engine: an `Attribute` names a column within a
//! table, a `Cell` is one (attribute, row key, value) fact — the atomic unit
//! of deletion. Cells are immutable; a changed value is a different cell.
//!

use serde::{Deserialize, Serialize};
use std::{cmp, fmt, hash};

/// A scalar value as stored in a table cell.
///
/// Equality and hashing are strict: `Integer(2)` and `Float(2.0)` are
/// different values (and hence identify different cells). Floats compare
/// with `total_cmp` and hash by their bit pattern so values can live in
/// ordered sets and maps.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, when there is one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Integer(_) => 0,
            Value::Float(_) => 1,
            Value::Text(_) => 2,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => l == r,
            (Value::Float(l), Value::Float(r)) => l.total_cmp(r) == cmp::Ordering::Equal,
            (Value::Text(l), Value::Text(r)) => l == r,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => l.cmp(r),
            (Value::Float(l), Value::Float(r)) => l.total_cmp(r),
            (Value::Text(l), Value::Text(r)) => l.cmp(r),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl hash::Hash for Value {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
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

/// A column within a named table
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribute {
    table: String,
    column: String,
}

impl Attribute {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Attribute {
        Attribute {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// One (attribute, row key, value) fact
///
/// Two cells with the same attribute and key but different values are
/// different cells: they describe different world states.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cell {
    attribute: Attribute,
    key: Value,
    value: Value,
}

impl Cell {
    pub fn new(attribute: Attribute, key: impl Into<Value>, value: impl Into<Value>) -> Cell {
        Cell {
            attribute,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub fn column(&self) -> &str {
        self.attribute.column()
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The same fact with another value: a different cell
    pub fn with_value(&self, value: impl Into<Value>) -> Cell {
        Cell {
            attribute: self.attribute.clone(),
            key: self.key.clone(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]=>{}", self.attribute, self.key, self.value)
    }
}
