//! Extraction engine
//!
//! Drives the level-by-level extraction plan produced by the classifier:
//! filters are resolved against the references accumulated so far, every
//! table of a level is fetched concurrently, and completed batches are
//! propagated back into the model and fanned out to the writers.

pub mod engine;
pub mod resolver;

pub use engine::{Extractor, TableRows};
pub use resolver::resolve_filters;

use datapluck_core::SchemaError;
use datapluck_reader::ReaderError;
use datapluck_writer::WriterError;

/// Errors that abort an extraction run
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// A filter references a value no earlier level produced
    #[error("filter {table}.{filter} not found `{expr}'")]
    UnresolvedReference {
        table: String,
        filter: String,
        expr: String,
    },

    /// Expansion left a declared filter without a usable binding
    #[error("not all filters were bound for table {0}")]
    FiltersNotBound(String),

    #[error("converter '{0}' not found")]
    UnknownConverter(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Writer(#[from] WriterError),
}
