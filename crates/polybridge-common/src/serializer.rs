use crate::error::Result;
use bytes::Bytes;
use serde_json::Value;

/// Encoding of internal payloads.
///
/// Protocol adapters decode external bodies into a [`Value`] and hand them to
/// the active serializer, which produces the bytes carried by an
/// `InternalRequest`.
pub trait Serializer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Bytes>;

    /// Decodes a payload. An empty payload decodes to `null`.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// JSON payload encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
