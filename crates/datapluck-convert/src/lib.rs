//! Value converters
//!
//! Converters turn raw fetched values into fixture-safe text. Each one
//! exposes a predicate (`handles`) and a transform (`convert`); at fetch
//! time the first registered converter whose predicate matches a value is
//! applied, unmatched values pass through unchanged.

pub mod blob;
pub mod datetime;
pub mod registry;

pub use blob::BlobConverter;
pub use datetime::DateTimeIso8601Converter;
pub use registry::ConverterRegistry;

use datapluck_core::Value;
use std::sync::Arc;

/// Conversion failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConvertError {
    #[error("'{value}' is not {expected}")]
    UnexpectedType { expected: &'static str, value: String },
}

/// A value transformer with a type-based predicate
pub trait Converter: Send + Sync {
    /// Whether this converter applies to the given value
    fn handles(&self, value: &Value) -> bool;

    /// Transform the value; only called when [`handles`](Self::handles)
    /// returned true, but must still fail cleanly on a mismatch
    fn convert(&self, value: &Value) -> Result<Value, ConvertError>;
}

/// Apply the first matching converter, in declaration order
pub fn apply(value: Value, converters: &[Arc<dyn Converter>]) -> Result<Value, ConvertError> {
    for converter in converters {
        if converter.handles(&value) {
            return converter.convert(&value);
        }
    }

    Ok(value)
}
