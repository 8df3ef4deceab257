//! Value serialization for accessors.
//!
//! Values handed to an accessor are `serde_json::Value`s. A [`Codec`] turns
//! them into the bytes stored in the engine and back. [`JsonCodec`] is the
//! default and round-trips any value; [`RawCodec`] stores strings as their
//! UTF-8 bytes, for namespaces that only ever hold text.

use std::fmt;

pub use serde_json::Value;

/// Converts values to stored bytes and back.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// JSON serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Raw string passthrough. Only string values can be stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(CodecError::NotText),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        std::str::from_utf8(bytes)
            .map(|s| Value::String(s.to_string()))
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

/// Errors that can occur while encoding or decoding a value.
#[derive(Debug)]
pub enum CodecError {
    /// JSON error.
    Json(serde_json::Error),
    /// The raw codec was given a non-string value.
    NotText,
    /// Stored bytes are not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::NotText => write!(f, "raw codec can only store strings"),
            Self::InvalidUtf8 => write!(f, "stored bytes are not valid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip_structured_values() {
        let codec = JsonCodec;
        for value in [
            json!({"temp": 15, "unit": "C"}),
            json!([1, "two", null, {"nested": [true, false]}]),
            json!("plain"),
            json!(-3.5),
            Value::Null,
        ] {
            let bytes = codec.encode(&value).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_json_rejects_malformed_bytes() {
        assert!(matches!(
            JsonCodec.decode(b"{not json"),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn test_raw_codec_passes_strings_through() {
        let bytes = RawCodec.encode(&json!("hello")).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(RawCodec.decode(b"hello").unwrap(), json!("hello"));
    }

    #[test]
    fn test_raw_codec_rejects_non_text() {
        assert!(matches!(
            RawCodec.encode(&json!(42)),
            Err(CodecError::NotText)
        ));
        assert!(matches!(
            RawCodec.decode(&[0xFF, 0xFE]),
            Err(CodecError::InvalidUtf8)
        ));
    }
}
