#![forbid(unsafe_code)]

//! Parameter values surfaced by the builder API.
//!
//! Values are what callers bind to named parameters and what executors hand
//! back inside result tuples. Temporal values carry an explicit kind so the
//! executor can apply the correct temporal semantics.

use serde::{Deserialize, Serialize};

/// Temporal interpretation attached to a temporal parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TemporalKind {
    /// Date component only.
    Date,
    /// Time-of-day component only.
    Time,
    /// Full date and time.
    Timestamp,
}

/// Literal values accepted as parameter bindings and returned in tuples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer value.
    Int(i64),
    /// 64-bit floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Temporal value as milliseconds since the Unix epoch.
    Temporal {
        /// Milliseconds since the Unix epoch.
        epoch_millis: i64,
        /// How the executor should interpret the instant.
        kind: TemporalKind,
    },
    /// Homogeneous list value, used for `IN` bindings.
    List(Vec<Value>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}
