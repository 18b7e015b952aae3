//! Pluggable body codec.
//!
//! The harness serialises JSON request bodies and deserialises response
//! bodies for object-equality assertions through this seam. The codec works
//! on [`serde_json::Value`] so it stays object-safe behind `dyn`.

use bytes::Bytes;
use serde_json::Value;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by a [`BodyCodec`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Serialising a body failed.
    #[error("failed to encode body")]
    Encode(#[source] BoxError),
    /// Deserialising a body failed.
    #[error("failed to decode body")]
    Decode(#[source] BoxError),
}

/// Body (de)serialisation capability consumed by the harness.
pub trait BodyCodec: Send + Sync {
    /// Encode a value into request body bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when the value cannot be serialised.
    fn encode(&self, value: &Value) -> Result<Bytes, CodecError>;

    /// Decode response body bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the bytes are not a valid body.
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;

    /// Content type advertised for encoded bodies.
    fn content_type(&self) -> &'static str { "application/json" }
}

/// Default codec: UTF-8 JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn round_trips_json() {
        let codec = JsonCodec;
        let value = json!({"name": "test", "number": 10_086});
        let bytes = codec.encode(&value).expect("encode");
        assert_eq!(codec.decode(&bytes).expect("decode"), value);
    }

    #[test]
    fn decode_rejects_invalid_utf8_json() {
        let codec = JsonCodec;
        assert!(matches!(
            codec.decode(b"{not json"),
            Err(CodecError::Decode(_))
        ));
    }
}
