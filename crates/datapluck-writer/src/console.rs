//! Console writer

use crate::{Writer, WriterError};
use datapluck_reader::Row;
use std::io::Write as _;

/// Prints extracted rows as indented name/value blocks
pub struct ConsoleWriter {
    out: Box<dyn std::io::Write + Send>,
}

impl ConsoleWriter {
    pub fn new() -> Self {
        Self {
            out: Box::new(std::io::stdout()),
        }
    }

    /// Redirect output, used by tests
    pub fn with_output(out: Box<dyn std::io::Write + Send>) -> Self {
        Self { out }
    }
}

impl Default for ConsoleWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for ConsoleWriter {
    fn write_header(&mut self) -> Result<(), WriterError> {
        Ok(())
    }

    fn write(&mut self, table: &str, rows: &[Row]) -> Result<(), WriterError> {
        for row in rows {
            writeln!(self.out, " > {}", table)?;

            for (column, value) in row {
                if !value.is_null() {
                    writeln!(self.out, "   {}: {}", column.name, value)?;
                }
            }
        }

        writeln!(self.out)?;
        Ok(())
    }

    fn write_footer(&mut self) -> Result<(), WriterError> {
        self.out.flush()?;
        Ok(())
    }
}
