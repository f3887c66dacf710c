//! Value Module
//!
//! Closed sum type over the shapes a stored value can take, plus its type tag.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{KvError, Result};

/// Structured kind names accepted by the envelope.
pub const STRUCTURED_KINDS: [&str; 6] = ["object", "array", "bool", "float", "uint", "null"];

// == Value ==
/// A value as it travels through the envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer, round-trips as an integer
    Int(i64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes, hex-encoded inside the envelope
    Bytes(Vec<u8>),
    /// Anything else serde can describe
    Structured(Json),
}

impl Value {
    /// Converts a serializable value into its tagged form.
    ///
    /// Integers that fit in `i64` become `Int`, strings become `Text`,
    /// everything else is `Structured`. Use `Value::Bytes` directly for
    /// byte payloads, since serde presents `Vec<u8>` as a sequence.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::from_json(serde_json::to_value(value)?))
    }

    /// Classifies an already-built JSON value.
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Number(ref n) if n.is_i64() => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Structured(json),
            },
            Json::String(s) => Value::Text(s),
            other => Value::Structured(other),
        }
    }

    /// Converts back into a caller type.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        let json = match self {
            Value::Int(i) => Json::from(i),
            Value::Text(s) => Json::String(s),
            Value::Bytes(b) => Json::from(b),
            Value::Structured(json) => json,
        };
        serde_json::from_value(json).map_err(|e| KvError::TypeMismatch(e.to_string()))
    }

    /// Returns the tag describing this value's shape.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Text(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Structured(json) => ValueType::Kind(kind_of(json).to_string()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Names the structural kind of a JSON value.
pub fn kind_of(json: &Json) -> &'static str {
    match json {
        Json::Object(_) => "object",
        Json::Array(_) => "array",
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_u64() => "uint",
        Json::Number(_) => "float",
        Json::String(_) => "string",
        Json::Null => "null",
    }
}

// == Value Type ==
/// Tag stored next to the payload. Serialized as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueType {
    Int,
    String,
    Bytes,
    /// Structural kind name, e.g. "object"
    Kind(String),
}

impl From<String> for ValueType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "int" => ValueType::Int,
            "string" => ValueType::String,
            "bytes" => ValueType::Bytes,
            _ => ValueType::Kind(tag),
        }
    }
}

impl From<ValueType> for String {
    fn from(tag: ValueType) -> Self {
        match tag {
            ValueType::Int => "int".to_string(),
            ValueType::String => "string".to_string(),
            ValueType::Bytes => "bytes".to_string(),
            ValueType::Kind(name) => name,
        }
    }
}
