//! Engine types
//!
//! Cycle context, per-entity stage machine, reports and the manifest.

use crate::error::{Error, Result};
use crate::query::format_datetime;
use crate::types::{DownloadPath, OutputKind};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;

// ============================================================================
// Cycle Context
// ============================================================================

/// State shared by every entity of one sync cycle
///
/// `now` is captured once, truncated to whole seconds, and used as the upper
/// bound of every window and as the new checkpoint.
#[derive(Debug, Clone)]
pub struct CycleContext {
    now: DateTime<Utc>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    span: Span,
}

impl CycleContext {
    /// Create a context for a cycle starting at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        let now = now.trunc_subsecs(0);
        let span = tracing::info_span!("cycle", now = %format_datetime(&now));
        Self {
            now,
            cancel: CancellationToken::new(),
            deadline: None,
            span,
        }
    }

    /// Create a context for a cycle starting right now
    pub fn start() -> Self {
        Self::new(Utc::now())
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Abort work still running after `timeout`
    #[must_use]
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Request cancellation of the cycle
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast if the cycle was cancelled or ran out of time
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled("cycle cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::cancelled("cycle deadline passed"));
        }
        Ok(())
    }

    /// Run `fut`, abandoning it on cancellation or deadline
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::cancelled("cycle cancelled")),
            () = deadline_reached(self.deadline) => Err(Error::cancelled("cycle deadline passed")),
            result = fut => result,
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Stage Machine
// ============================================================================

/// Stages of one entity's cycle, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clean,
    DataDownload,
    DeletedDownload,
    ResyncDownload,
    Checkpointed,
}

impl Stage {
    /// Stage that follows this one
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Clean => Some(Self::DataDownload),
            Self::DataDownload => Some(Self::DeletedDownload),
            Self::DeletedDownload => Some(Self::ResyncDownload),
            Self::ResyncDownload => Some(Self::Checkpointed),
            Self::Checkpointed => None,
        }
    }

    /// Output produced by a download stage
    pub fn output_kind(self) -> Option<OutputKind> {
        match self {
            Self::DataDownload => Some(OutputKind::Data),
            Self::DeletedDownload => Some(OutputKind::Deleted),
            Self::ResyncDownload => Some(OutputKind::Resync),
            Self::Clean | Self::Checkpointed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Clean => "clean",
            Self::DataDownload => "data download",
            Self::DeletedDownload => "deleted download",
            Self::ResyncDownload => "resync download",
            Self::Checkpointed => "checkpointed",
        };
        f.write_str(s)
    }
}

/// Attempts of one download step: bulk first, then one synchronous fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Attempt {
    Bulk,
    Fallback { bulk_error: String },
}

/// A finished output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StepOutput {
    pub path: PathBuf,
    pub rows: usize,
    pub via: DownloadPath,
}

// ============================================================================
// Reports
// ============================================================================

/// What one entity's cycle produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityStats {
    /// Columns of the data file
    pub columns: Vec<String>,
    pub data_rows: usize,
    pub deleted_rows: usize,
    pub resync_rows: usize,
    /// Path that produced the data file
    pub data_path: Option<DownloadPath>,
    /// Path that produced the resync file, when one ran
    pub resync_path: Option<DownloadPath>,
    /// Fields backfilled by the resync pass
    pub resynced_fields: Vec<String>,
    /// Files written this cycle
    pub files: Vec<PathBuf>,
    /// Stored checkpoint after the cycle; newer than `now` when a later
    /// cycle already moved it
    pub checkpoint: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

/// Result for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityOutcome {
    /// All steps finished; `checkpoint` is the stored value, normally the
    /// cycle timestamp
    Advanced {
        checkpoint: DateTime<Utc>,
        stats: EntityStats,
    },
    /// A step failed; the checkpoint is unchanged
    Failed {
        reason: String,
        /// The entity's configuration is at fault, not the remote system
        configuration: bool,
    },
}

impl EntityOutcome {
    pub(crate) fn failed(error: &Error) -> Self {
        Self::Failed {
            reason: error.to_string(),
            configuration: error.is_configuration(),
        }
    }

    pub fn is_advanced(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

/// Partial-success summary of one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Cycle timestamp
    pub now: DateTime<Utc>,
    /// Outcome per processed entity, keyed by entity id
    pub entities: BTreeMap<String, EntityOutcome>,
    /// Disabled entities that were not touched
    pub skipped: Vec<String>,
    /// Where the manifest was written
    pub manifest_path: Option<PathBuf>,
}

impl CycleReport {
    /// Ids of entities whose checkpoint advanced
    pub fn advanced(&self) -> Vec<&str> {
        self.entities
            .iter()
            .filter(|(_, o)| o.is_advanced())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Ids and reasons of entities that failed
    pub fn failed(&self) -> Vec<(&str, &str)> {
        self.entities
            .iter()
            .filter_map(|(id, o)| match o {
                EntityOutcome::Failed { reason, .. } => Some((id.as_str(), reason.as_str())),
                EntityOutcome::Advanced { .. } => None,
            })
            .collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.entities.values().all(EntityOutcome::is_advanced)
    }

    pub fn stats(&self, entity: &str) -> Option<&EntityStats> {
        match self.entities.get(entity) {
            Some(EntityOutcome::Advanced { stats, .. }) => Some(stats),
            _ => None,
        }
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// Listing of every file a cycle produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionManifest {
    pub meta: ManifestMeta,
    /// Per entity: selected fields and absolute file paths
    pub objects: BTreeMap<String, ManifestObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    /// Remote server the data came from
    pub server: String,
    /// Cycle timestamp
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestObject {
    pub fields: Vec<String>,
    pub files: Vec<PathBuf>,
}

impl ExtractionManifest {
    pub fn new(server: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            meta: ManifestMeta {
                server: server.into(),
                generated_at: Some(now),
            },
            objects: BTreeMap::new(),
        }
    }

    /// Record an entity's fields and files
    pub fn add(&mut self, entity: impl Into<String>, fields: Vec<String>, files: Vec<PathBuf>) {
        self.objects
            .insert(entity.into(), ManifestObject { fields, files });
    }

    /// Write the manifest as pretty JSON (temp file + rename)
    pub async fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|e| Error::output(format!("Failed to write manifest: {e}")))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| Error::output(format!("Failed to replace manifest: {e}")))?;
        Ok(())
    }
}
