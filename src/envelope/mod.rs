//! Envelope Module
//!
//! Wraps every value in a typed, timestamped envelope before it is persisted.

mod codec;
mod value;

pub use codec::{Codec, JsonCodec};
pub use value::{kind_of, Value, ValueType, STRUCTURED_KINDS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{KvError, Result};

// == Envelope ==
/// Typed wrapper written for every stored value.
///
/// The timestamp is taken when the envelope is sealed and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub value_type: ValueType,
    pub value: Json,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Seals a value, stamping it with the current UTC time.
    pub fn seal(value: &Value) -> Self {
        let payload = match value {
            Value::Int(i) => Json::from(*i),
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::String(hex::encode(b)),
            Value::Structured(json) => json.clone(),
        };

        Self {
            value_type: value.value_type(),
            value: payload,
            timestamp: Utc::now(),
        }
    }

    /// Opens the envelope back into a value, checking the payload against its tag.
    pub fn open(self) -> Result<Value> {
        match self.value_type {
            ValueType::Int => self
                .value
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| mismatch("int", &self.value)),
            ValueType::String => match self.value {
                Json::String(s) => Ok(Value::Text(s)),
                other => Err(mismatch("string", &other)),
            },
            ValueType::Bytes => match self.value {
                Json::String(s) => hex::decode(&s)
                    .map(Value::Bytes)
                    .map_err(|e| KvError::TypeMismatch(format!("bytes payload: {}", e))),
                other => Err(mismatch("bytes", &other)),
            },
            ValueType::Kind(name) => {
                if !STRUCTURED_KINDS.contains(&name.as_str()) {
                    return Err(KvError::TypeMismatch(format!(
                        "unsupported value type '{}'",
                        name
                    )));
                }
                if kind_of(&self.value) != name && !(name == "float" && self.value.is_number()) {
                    return Err(mismatch(&name, &self.value));
                }
                Ok(Value::Structured(self.value))
            }
        }
    }
}

fn mismatch(expected: &str, found: &Json) -> KvError {
    KvError::TypeMismatch(format!(
        "envelope tagged '{}' holds {}",
        expected,
        kind_of(found)
    ))
}

// == Serialize / Deserialize ==
/// Seals a value and marshals the whole envelope.
pub fn serialize(codec: &dyn Codec, value: &Value) -> Result<Vec<u8>> {
    codec.marshal(&Envelope::seal(value))
}

/// Unmarshals an envelope and opens it.
pub fn deserialize(codec: &dyn Codec, data: &[u8]) -> Result<Value> {
    codec.unmarshal(data)?.open()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seal_stamps_current_time() {
        let before = Utc::now();
        let envelope = Envelope::seal(&Value::Int(7));
        let after = Utc::now();

        assert!(envelope.timestamp >= before && envelope.timestamp <= after);
        assert_eq!(envelope.value_type, ValueType::Int);
        assert_eq!(envelope.value, json!(7));
    }

    #[test]
    fn test_serialize_wraps_the_envelope() {
        let data = serialize(&JsonCodec, &Value::Text("hi".into())).unwrap();
        let raw: Json = serde_json::from_slice(&data).unwrap();

        assert_eq!(raw["value_type"], "string");
        assert_eq!(raw["value"], "hi");
        assert!(raw["timestamp"].is_string());
    }

    #[test]
    fn test_roundtrip_each_variant() {
        let values = vec![
            Value::Int(-3),
            Value::Text("text".into()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Structured(json!({"a": [1, 2]})),
            Value::Structured(json!(2.5)),
        ];
        for value in values {
            let data = serialize(&JsonCodec, &value).unwrap();
            assert_eq!(deserialize(&JsonCodec, &data).unwrap(), value);
        }
    }

    #[test]
    fn test_unknown_value_type_is_rejected() {
        let data = br#"{"value_type":"complex128","value":1,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let result = deserialize(&JsonCodec, data);
        assert!(matches!(result, Err(KvError::TypeMismatch(_))));
    }

    #[test]
    fn test_tag_payload_disagreement_is_rejected() {
        let data = br#"{"value_type":"int","value":"seven","timestamp":"2024-01-01T00:00:00Z"}"#;
        let result = deserialize(&JsonCodec, data);
        assert!(matches!(result, Err(KvError::TypeMismatch(_))));
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let result = deserialize(&JsonCodec, b"\x00\x01not json");
        assert!(matches!(result, Err(KvError::Serialization(_))));
    }
}
