//! Bulk result merging
//!
//! A bulk job delivers its results as a set of partial CSV files. The merger
//! folds them into one canonical file with a single header row.

use super::writer::quoted_writer;
use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Body of a partial file that carries no records
pub const EMPTY_RESULT_SENTINEL: &str = "Records not found for this query";

/// Outcome of a merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Data rows written to the output
    pub rows: usize,
    /// Partial files folded into the output
    pub files_merged: usize,
    /// Partial files skipped as sentinel or zero-length
    pub files_skipped: usize,
}

/// Merges bulk partial result files
#[derive(Debug, Clone)]
pub struct BulkResultMerger {
    delete_inputs: bool,
}

impl Default for BulkResultMerger {
    fn default() -> Self {
        Self {
            delete_inputs: true,
        }
    }
}

impl BulkResultMerger {
    /// Create a merger that deletes its inputs
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave partial files on disk after merging
    #[must_use]
    pub fn keep_inputs(mut self) -> Self {
        self.delete_inputs = false;
        self
    }

    /// Merge `partial_files`, in order, into `output`
    ///
    /// The header comes from the first file with content; `fallback_header`
    /// is written when every input was a sentinel, so the output always
    /// exists. Partial files with a different header are rejected.
    pub fn merge(
        &self,
        partial_files: &[PathBuf],
        output: &Path,
        fallback_header: &[String],
    ) -> Result<MergeSummary> {
        let mut writer = quoted_writer(output)?;
        let mut header: Option<csv::StringRecord> = None;
        let mut summary = MergeSummary::default();

        for file in partial_files {
            if is_empty_result(file)? {
                debug!(file = %file.display(), "Skipping empty bulk result");
                summary.files_skipped += 1;
                self.remove_input(file)?;
                continue;
            }

            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .from_path(file)
                .map_err(|e| Error::output(format!("Failed to open {}: {e}", file.display())))?;
            let file_header = reader.headers()?.clone();

            match &header {
                None => {
                    writer.write_record(&file_header)?;
                    header = Some(file_header);
                }
                Some(existing) if *existing != file_header => {
                    return Err(Error::output(format!(
                        "Header of {} differs from the first partial file",
                        file.display()
                    )));
                }
                Some(_) => {}
            }

            for record in reader.records() {
                writer.write_record(&record?)?;
                summary.rows += 1;
            }

            summary.files_merged += 1;
            drop(reader);
            self.remove_input(file)?;
        }

        if header.is_none() {
            writer.write_record(fallback_header)?;
        }
        writer.flush()?;

        Ok(summary)
    }

    fn remove_input(&self, file: &Path) -> Result<()> {
        if self.delete_inputs {
            std::fs::remove_file(file).map_err(|e| {
                Error::output(format!("Failed to delete partial file {}: {e}", file.display()))
            })?;
        }
        Ok(())
    }
}

/// True for zero-length files and files holding only the sentinel line
fn is_empty_result(path: &Path) -> Result<bool> {
    let len = std::fs::metadata(path)
        .map_err(|e| Error::output(format!("Failed to stat {}: {e}", path.display())))?
        .len();
    if len == 0 {
        return Ok(true);
    }
    // Anything much longer than the sentinel holds data
    if len > (EMPTY_RESULT_SENTINEL.len() + 8) as u64 {
        return Ok(false);
    }

    let mut contents = String::new();
    std::fs::File::open(path)?.read_to_string(&mut contents)?;
    let trimmed = contents.trim().trim_matches('"');
    Ok(trimmed.is_empty() || trimmed == EMPTY_RESULT_SENTINEL)
}
