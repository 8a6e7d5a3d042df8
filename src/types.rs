//! Common types used throughout Solidafy Extract
//!
//! Shared type aliases and small enums used across multiple modules.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// One record returned by the query API, keyed by column id
pub type Row = serde_json::Map<String, JsonValue>;

// ============================================================================
// Output Kind
// ============================================================================

/// The kind of file produced for an entity during one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Main incremental data (`<entity>.csv`)
    Data,
    /// Soft-deleted records (`<entity>_deleted.csv`)
    Deleted,
    /// Full-history backfill of newly enabled fields (`<entity>_synchronization.csv`)
    Resync,
}

impl OutputKind {
    /// Suffix appended to the entity id in the file name
    pub fn file_suffix(self) -> &'static str {
        match self {
            Self::Data => "",
            Self::Deleted => "_deleted",
            Self::Resync => "_synchronization",
        }
    }

    /// Output file name without the `.csv` extension
    pub fn file_stem(self, prefix: Option<&str>, entity_id: &str) -> String {
        let suffix = self.file_suffix();
        match prefix {
            Some(p) => format!("{p}_{entity_id}{suffix}"),
            None => format!("{entity_id}{suffix}"),
        }
    }

    /// Build the output file name for an entity
    pub fn file_name(self, prefix: Option<&str>, entity_id: &str) -> String {
        format!("{}.csv", self.file_stem(prefix, entity_id))
    }

    /// All output kinds, in the order they are produced
    pub fn all() -> [OutputKind; 3] {
        [Self::Data, Self::Deleted, Self::Resync]
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Data => "data",
            Self::Deleted => "deleted records",
            Self::Resync => "resync",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Download Path
// ============================================================================

/// Which extraction path produced a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPath {
    /// Asynchronous bulk job returning partial result files
    Bulk,
    /// Row-streaming query API
    Synchronous,
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// Utilities
// ============================================================================

/// Extension trait for Option<String> to handle empty strings
pub trait OptionStringExt {
    /// Returns None if the string is empty
    fn none_if_empty(self) -> Option<String>;
}

impl OptionStringExt for Option<String> {
    fn none_if_empty(self) -> Option<String> {
        self.filter(|s| !s.is_empty())
    }
}
