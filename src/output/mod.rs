//! Output module
//!
//! Handles the per-entity CSV files and their archival.
//!
//! # Overview
//!
//! This module provides utilities for:
//! - Writing row streams to always-quoted CSV (`RowWriter`)
//! - Folding bulk partial result files into one file (`BulkResultMerger`)
//! - Archiving finished files to object storage (S3, R2, GCS, Azure, local)

mod backup;
mod merge;
mod writer;

pub use backup::{build_backup_key, BackupSink, ObjectStoreBackup};
pub use merge::{BulkResultMerger, MergeSummary, EMPTY_RESULT_SENTINEL};
pub use writer::{cell_value, write_rows, RowWriter, NIL_MARKER_KEY};
