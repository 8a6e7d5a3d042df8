//! Checkpoint types
//!
//! These types are serialized to JSON and persisted between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Checkpoints for every entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Per-entity checkpoint, keyed by entity id
    #[serde(default)]
    pub entities: HashMap<String, EntityCheckpoint>,
}

impl CheckpointState {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the last load timestamp for an entity
    pub fn last_load(&self, entity: &str) -> Option<DateTime<Utc>> {
        self.entities.get(entity).map(|c| c.last_load_timestamp)
    }

    /// Move an entity's checkpoint forward
    ///
    /// Returns false, leaving the state untouched, when `timestamp` is older
    /// than the stored checkpoint.
    pub fn advance(&mut self, entity: &str, timestamp: DateTime<Utc>) -> bool {
        match self.entities.get_mut(entity) {
            Some(existing) if existing.last_load_timestamp > timestamp => false,
            Some(existing) => {
                existing.last_load_timestamp = timestamp;
                true
            }
            None => {
                self.entities
                    .insert(entity.to_string(), EntityCheckpoint::new(timestamp));
                true
            }
        }
    }
}

/// Checkpoint for a single entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCheckpoint {
    /// Cycle-start time of the last fully successful cycle
    pub last_load_timestamp: DateTime<Utc>,
}

impl EntityCheckpoint {
    pub fn new(last_load_timestamp: DateTime<Utc>) -> Self {
        Self {
            last_load_timestamp,
        }
    }
}
