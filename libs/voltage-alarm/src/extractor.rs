//! Payload extraction
//!
//! Telemetry bodies are JSON objects. Some producers wrap the real document in
//! a `value` string ("double-encoded"), e.g. `{"value": "{\"temp\":35}"}`.
//!
//! Decoding order:
//! 1. body must parse as a JSON object, otherwise the whole message is rejected
//! 2. if `value` is a string that itself parses as a JSON object, that nested
//!    object becomes the working document
//! 3. otherwise the outer object is the working document

use serde_json::{Map, Value};

use crate::error::{AlarmError, Result};

/// Field holding a possibly double-encoded document
pub const ENVELOPE_FIELD: &str = "value";

/// Flat key/value document extracted from a message body
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
    unwrapped: bool,
}

impl Document {
    /// Direct property lookup; nested paths are not supported
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether the document came from a nested `value` string
    pub fn is_unwrapped(&self) -> bool {
        self.unwrapped
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Stateless decoder for raw message bodies
pub struct PayloadExtractor;

impl PayloadExtractor {
    pub fn decode(body: &[u8]) -> Result<Document> {
        let outer = match serde_json::from_slice::<Value>(body)? {
            Value::Object(map) => map,
            other => {
                return Err(AlarmError::Decode(format!(
                    "expected JSON object, got {}",
                    json_type_name(&other)
                )))
            },
        };

        if let Some(nested) = Self::unwrap_nested(&outer) {
            return Ok(Document {
                fields: nested,
                unwrapped: true,
            });
        }

        Ok(Document {
            fields: outer,
            unwrapped: false,
        })
    }

    fn unwrap_nested(outer: &Map<String, Value>) -> Option<Map<String, Value>> {
        let Value::String(raw) = outer.get(ENVELOPE_FIELD)? else {
            return None;
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// Stringify an extracted value for `triggering_value`
///
/// Strings are kept verbatim; everything else is compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
