//! Output writers
//!
//! A [`Writer`] renders extracted batches into one target format. The
//! engine calls `write_header` once, `write` once per table batch and
//! `write_footer` once, strictly in that order; every failure is
//! returned to the caller, never terminates the process.

pub mod console;
pub mod sql;
pub mod xml;

pub use console::ConsoleWriter;
pub use sql::SqlWriter;
pub use xml::XmlWriter;

use datapluck_reader::Row;
use std::path::PathBuf;

/// Writer failures
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("unsupported file type: {0}")]
    UnsupportedOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The writer's consumer stopped before the extraction finished
    #[error("writer terminated before the extraction finished")]
    Closed,
}

/// Renders extracted rows into one output format
pub trait Writer: Send {
    fn write_header(&mut self) -> Result<(), WriterError>;

    fn write(&mut self, table: &str, rows: &[Row]) -> Result<(), WriterError>;

    fn write_footer(&mut self) -> Result<(), WriterError>;
}

/// Settings for one output sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// One of [`supported_types`]
    pub kind: String,

    /// Human-friendly indentation where the format supports it
    pub formatted: bool,

    /// Target directory for file-based outputs
    pub directory: PathBuf,

    /// Base file name (without extension) for file-based outputs
    pub name: String,
}

impl OutputConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            formatted: false,
            directory: PathBuf::from("."),
            name: "dataset".to_string(),
        }
    }

    pub fn formatted(mut self, formatted: bool) -> Self {
        self.formatted = formatted;
        self
    }

    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Output kinds this build can render
pub fn supported_types() -> &'static [&'static str] {
    &["console", "xml", "sql"]
}

/// Build a writer for the configured output kind
///
/// The kind is checked before any file is touched, so an unsupported
/// output fails fast.
pub fn new_writer(config: &OutputConfig) -> Result<Box<dyn Writer + Send>, WriterError> {
    match config.kind.to_lowercase().as_str() {
        "console" => Ok(Box::new(ConsoleWriter::new())),
        "xml" => Ok(Box::new(XmlWriter::new(config))),
        "sql" => Ok(Box::new(SqlWriter::new(config))),
        other => Err(WriterError::UnsupportedOutput(other.to_string())),
    }
}
