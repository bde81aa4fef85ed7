//! Host-neutral values and statement parameters.

use serde::{Deserialize, Serialize};

/// A value fetched from a result column.
///
/// Numeric columns narrower than 64 bits are widened to [`Value::Double`];
/// 64-bit integer columns keep their exact value as [`Value::Int`] or
/// [`Value::UInt`] depending on the column's unsigned flag. Everything else
/// (decimal, temporal, string, blob, json, enum, set, bit, geometry) is
/// carried as opaque bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,

    /// SQL NULL, kept as a distinguished marker so the column stays present
    /// in the row
    ExplicitNull,

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit unsigned integer
    UInt(u64),

    /// 64-bit floating point
    Double(f64),

    /// Raw column bytes (text or binary)
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL (either form).
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::ExplicitNull)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::ExplicitNull => "NULL",
            Value::Int(_) => "BIGINT",
            Value::UInt(_) => "BIGINT UNSIGNED",
            Value::Double(_) => "DOUBLE",
            Value::Bytes(_) => "BYTES",
        }
    }

    /// Try to get this value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Try to get this value as a u64.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Try to get this value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get this value as raw bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get this value as UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(v.into_bytes())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// A statement parameter, as the host hands it over.
///
/// Binding follows the host's dynamic types: booleans become a 1-byte
/// integer, every number is sent as an 8-byte float, and anything else is
/// sent as raw bytes with its exact length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Param {
    /// NULL (or an absent argument)
    Null,
    /// Boolean
    Bool(bool),
    /// Number
    Number(f64),
    /// Text or binary data
    Bytes(Vec<u8>),
}

impl Param {
    /// Check if this parameter binds as NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Param::Null)
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Number(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Number(f64::from(v))
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Number(v as f64)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Bytes(v.into_bytes())
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Bytes(v)
    }
}

impl From<&[u8]> for Param {
    fn from(v: &[u8]) -> Self {
        Param::Bytes(v.to_vec())
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Param::Null,
        }
    }
}
