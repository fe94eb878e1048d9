//! Datapluck core
//!
//! Domain model for fixture extraction: the value variants a database can
//! produce, the declarative extraction schema, structural validation and
//! the dependency classifier that orders tables into fetchable levels.

pub mod classify;
pub mod schema;
pub mod validate;
pub mod value;

pub use schema::{Filter, FilterKind, Model, RefValue, SchemaError, Table};
pub use validate::ConverterLookup;
pub use value::Value;
