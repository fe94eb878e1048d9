//! SQL insert-script writer
//!
//! Renders each batch as `INSERT` statements wrapped in a single
//! transaction so a fixture loads atomically.

use crate::{OutputConfig, Writer, WriterError};
use datapluck_core::Value;
use datapluck_reader::Row;
use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use tracing::debug;

pub struct SqlWriter {
    formatted: bool,
    directory: PathBuf,
    name: String,
    file: Option<File>,
}

impl SqlWriter {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            formatted: config.formatted,
            directory: config.directory.clone(),
            name: config.name.clone(),
            file: None,
        }
    }
}

impl Writer for SqlWriter {
    fn write_header(&mut self) -> Result<(), WriterError> {
        std::fs::create_dir_all(&self.directory)?;

        let path = self.directory.join(format!("{}.sql", self.name));
        debug!(path = %path.display(), "creating sql script");

        let mut file = File::create(path)?;
        file.write_all(b"BEGIN;\n")?;

        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, table: &str, rows: &[Row]) -> Result<(), WriterError> {
        let file = self.file.as_mut().ok_or(WriterError::Closed)?;

        for row in rows {
            let bound: Vec<&(datapluck_reader::DbColumn, Value)> =
                row.iter().filter(|(_, v)| !v.is_null()).collect();

            if bound.is_empty() {
                continue;
            }

            let columns = bound
                .iter()
                .map(|(c, _)| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let values = bound
                .iter()
                .map(|(_, v)| render_value(v))
                .collect::<Vec<_>>()
                .join(", ");

            writeln!(file, "INSERT INTO {} ({}) VALUES ({});", table, columns, values)?;
        }

        if self.formatted {
            writeln!(file)?;
        }

        Ok(())
    }

    fn write_footer(&mut self) -> Result<(), WriterError> {
        let mut file = self.file.take().ok_or(WriterError::Closed)?;
        file.write_all(b"COMMIT;\n")?;
        file.flush()?;
        Ok(())
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}
