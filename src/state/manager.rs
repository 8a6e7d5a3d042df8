//! Checkpoint store implementation
//!
//! Provides file-based checkpoint persistence with atomic writes.

use super::types::{CheckpointState, EntityCheckpoint};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Store for persisting and loading per-entity checkpoints
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    /// Path to the state file
    path: PathBuf,
    /// Current state (cached, shared between clones)
    state: Arc<RwLock<CheckpointState>>,
    /// Whether to save on every advance
    auto_save: bool,
}

impl CheckpointStore {
    /// Create a new store with the given path
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Arc::new(RwLock::new(CheckpointState::new())),
            auto_save: true,
        }
    }

    /// Create a store with auto-save disabled
    pub fn without_auto_save(path: impl AsRef<Path>) -> Self {
        Self {
            auto_save: false,
            ..Self::new(path)
        }
    }

    /// Create an in-memory store (no file persistence)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(CheckpointState::new())),
            auto_save: false,
        }
    }

    /// Create a store from a file, loading existing checkpoints if present
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
            serde_json::from_str(&contents)
                .map_err(|e| Error::state(format!("Failed to parse state file: {e}")))?
        } else {
            CheckpointState::new()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
            auto_save: true,
        })
    }

    /// Create an in-memory store from inline JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let state: CheckpointState = serde_json::from_str(json)
            .map_err(|e| Error::state(format!("Failed to parse state JSON: {e}")))?;

        Ok(Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(state)),
            auto_save: false,
        })
    }

    /// Reload state from the file, if it exists
    pub async fn load(&self) -> Result<()> {
        if self.is_in_memory() || !self.path.exists() {
            return Ok(());
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
        let loaded: CheckpointState = serde_json::from_str(&contents)
            .map_err(|e| Error::state(format!("Failed to parse state file: {e}")))?;

        *self.state.write().await = loaded;
        Ok(())
    }

    /// Save current state to file
    pub async fn save(&self) -> Result<()> {
        let state = self.state.write().await;
        self.persist(&state).await
    }

    /// Write `state` to the file (temp file + rename)
    ///
    /// Callers hold the state write lock, so writers never share the temp file.
    async fn persist(&self, state: &CheckpointState) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }

        let contents = serde_json::to_string_pretty(state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::state(format!("Failed to write state file: {e}")))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::state(format!("Failed to rename state file: {e}")))?;

        debug!(path = %self.path.display(), "Checkpoint state saved");
        Ok(())
    }

    /// Get the last load timestamp for an entity
    pub async fn last_load(&self, entity: &str) -> Option<DateTime<Utc>> {
        self.state.read().await.last_load(entity)
    }

    /// Advance an entity's checkpoint
    ///
    /// A timestamp older than the stored checkpoint is ignored with a warning;
    /// returns whether the checkpoint was written. With auto-save on, a failed
    /// save leaves the previous checkpoint in place.
    pub async fn advance(&self, entity: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let previous = state.entities.get(entity).copied();

        if !state.advance(entity, timestamp) {
            warn!(
                entity,
                timestamp = %timestamp,
                "Refusing to move checkpoint backwards"
            );
            return Ok(false);
        }

        if self.auto_save {
            if let Err(e) = self.persist(&state).await {
                restore(&mut state, entity, previous);
                return Err(e);
            }
        }

        Ok(true)
    }

    /// Drop the checkpoint for an entity, forcing a full-history load next cycle
    pub async fn reset(&self, entity: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let previous = state.entities.remove(entity);

        if self.auto_save {
            if let Err(e) = self.persist(&state).await {
                restore(&mut state, entity, previous);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Get a snapshot of the current state
    pub async fn snapshot(&self) -> CheckpointState {
        self.state.read().await.clone()
    }

    /// Export state as pretty-printed JSON string
    pub async fn to_json_pretty(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string_pretty(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    /// Get the state file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

/// Put back an entity's checkpoint after a failed save
fn restore(state: &mut CheckpointState, entity: &str, previous: Option<EntityCheckpoint>) {
    match previous {
        Some(checkpoint) => {
            state.entities.insert(entity.to_string(), checkpoint);
        }
        None => {
            state.entities.remove(entity);
        }
    }
}
