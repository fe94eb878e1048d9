//! Binary payload converter

use crate::{ConvertError, Converter};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use datapluck_core::Value;

/// Renders binary values as standard base64 text
pub struct BlobConverter;

impl Converter for BlobConverter {
    fn handles(&self, value: &Value) -> bool {
        matches!(value, Value::Bytes(_))
    }

    fn convert(&self, value: &Value) -> Result<Value, ConvertError> {
        match value {
            Value::Bytes(bytes) => Ok(Value::Text(STANDARD.encode(bytes))),
            other => Err(ConvertError::UnexpectedType {
                expected: "a binary value",
                value: other.to_string(),
            }),
        }
    }
}
