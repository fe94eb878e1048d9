//! DbUnit flat dataset writer
//!
//! One self-closing element per row, named after the table, with one
//! attribute per non-null column. `formatted` switches between a single
//! line and an indented layout.

use crate::{OutputConfig, Writer, WriterError};
use datapluck_reader::Row;
use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use tracing::debug;

pub struct XmlWriter {
    formatted: bool,
    directory: PathBuf,
    name: String,
    file: Option<File>,
}

impl XmlWriter {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            formatted: config.formatted,
            directory: config.directory.clone(),
            name: config.name.clone(),
            file: None,
        }
    }

    fn file(&mut self) -> Result<&mut File, WriterError> {
        self.file.as_mut().ok_or(WriterError::Closed)
    }
}

impl Writer for XmlWriter {
    fn write_header(&mut self) -> Result<(), WriterError> {
        std::fs::create_dir_all(&self.directory)?;

        let path = self.directory.join(format!("{}.xml", self.name));
        debug!(path = %path.display(), "creating xml dataset");

        let mut file = File::create(path)?;
        if self.formatted {
            file.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<dataset>\n")?;
        } else {
            file.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><dataset>")?;
        }

        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, table: &str, rows: &[Row]) -> Result<(), WriterError> {
        let body = if self.formatted {
            formatted_records(table, rows)
        } else {
            unformatted_records(table, rows)
        };

        self.file()?.write_all(body.as_bytes())?;
        Ok(())
    }

    fn write_footer(&mut self) -> Result<(), WriterError> {
        let mut file = self.file.take().ok_or(WriterError::Closed)?;
        file.write_all(b"</dataset>")?;
        file.flush()?;
        Ok(())
    }
}

fn formatted_records(table: &str, rows: &[Row]) -> String {
    let mut out = String::new();

    for row in rows {
        out.push_str(&format!("  <{}", table));

        for (column, value) in row {
            if !value.is_null() {
                out.push_str(&format!(
                    "\n    {}=\"{}\"",
                    column.name,
                    escape_attr(&value.to_string())
                ));
            }
        }

        out.push_str("/>\n");
    }

    out
}

fn unformatted_records(table: &str, rows: &[Row]) -> String {
    let mut out = String::new();

    for row in rows {
        out.push_str(&format!("<{}", table));

        for (column, value) in row {
            if !value.is_null() {
                out.push_str(&format!(
                    " {}=\"{}\"",
                    column.name,
                    escape_attr(&value.to_string())
                ));
            }
        }

        out.push_str("/>");
    }

    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }

    out
}
