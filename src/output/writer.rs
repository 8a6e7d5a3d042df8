//! CSV row writer
//!
//! Serializes query rows to a delimited file with a fixed column order.
//! Every cell is quoted, so embedded separators and newlines survive.

use crate::error::{Error, Result};
use crate::types::{JsonValue, Row};
use futures::{Stream, TryStreamExt};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Key of the explicit-null marker object sent by the API
pub const NIL_MARKER_KEY: &str = "xsi:nil";

/// Check whether a value is the API's explicit-null marker object
fn is_nil_marker(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) if map.len() == 1 => match map.get(NIL_MARKER_KEY) {
            Some(JsonValue::String(s)) => s == "true",
            Some(JsonValue::Bool(b)) => *b,
            _ => false,
        },
        _ => false,
    }
}

/// Render one cell
///
/// Absent values, JSON nulls, and a single-element wrapper holding the
/// explicit-null marker all become an empty cell. Everything else passes
/// through: strings verbatim, other values as their JSON text.
pub fn cell_value(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::Array(items)) if items.len() == 1 && is_nil_marker(&items[0]) => {
            String::new()
        }
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Create a CSV writer that quotes every field
pub(crate) fn quoted_writer(path: &Path) -> Result<csv::Writer<File>> {
    csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_path(path)
        .map_err(|e| Error::output(format!("Failed to create {}: {e}", path.display())))
}

/// Writer for one entity output file
pub struct RowWriter {
    writer: csv::Writer<File>,
    columns: Vec<String>,
    path: PathBuf,
    rows_written: usize,
}

impl RowWriter {
    /// Create the file and write the header row
    pub fn create(path: impl AsRef<Path>, columns: &[String]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = quoted_writer(&path)?;
        writer.write_record(columns)?;

        Ok(Self {
            writer,
            columns: columns.to_vec(),
            path,
            rows_written: 0,
        })
    }

    /// Write one row, looking values up by column id
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        let record = self.columns.iter().map(|c| cell_value(row.get(c)));
        self.writer.write_record(record)?;
        self.rows_written += 1;
        Ok(())
    }

    /// Get the number of rows written so far
    #[must_use]
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file, returning the data row count
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        Ok(self.rows_written)
    }
}

/// Drain a row stream into a new file
pub async fn write_rows<S>(rows: S, path: impl AsRef<Path>, columns: &[String]) -> Result<usize>
where
    S: Stream<Item = Result<Row>>,
{
    let mut writer = RowWriter::create(path, columns)?;
    futures::pin_mut!(rows);
    while let Some(row) = rows.try_next().await? {
        writer.write_row(&row)?;
    }
    writer.finish()
}
