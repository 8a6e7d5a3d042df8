//! Catalog types
//!
//! These types are serialized to the catalog document and persist across
//! cycles, except `RuntimeOutputs` which only lives for one cycle.

use crate::error::{Error, Result};
use crate::schema::{normalize, FieldDescriptor, NormalizedType};
use crate::types::OutputKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

const DEFAULT_ID_COLUMN: &str = "Id";
const DEFAULT_TIMESTAMP_COLUMN: &str = "CreatedDate";
const DEFAULT_IS_DELETED_COLUMN: &str = "IsDeleted";

fn default_true() -> bool {
    true
}

// ============================================================================
// Custom Config
// ============================================================================

/// How history is tracked for an entity downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    #[default]
    None,
    Normalized,
    Denormalized,
}

/// Per-entity overrides for well-known column names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomConfig {
    /// Primary-key column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Column used for the incremental window filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Soft-delete flag column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deleted_column: Option<String>,

    /// Columns never extracted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_columns: Vec<String>,

    #[serde(default)]
    pub history_mode: HistoryMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_owner: Option<String>,
}

// ============================================================================
// Field
// ============================================================================

/// One column of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Source column name
    pub id: String,

    #[serde(default)]
    pub label: String,

    /// Normalized type token, filled in by describe
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub normalized_type: Option<NormalizedType>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// False until the field's history has been backfilled once
    #[serde(default)]
    pub synchronized: bool,
}

impl Field {
    /// Create an enabled, not yet synchronized field
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            normalized_type: None,
            enabled: true,
            synchronized: false,
        }
    }

    /// Set the normalized type
    #[must_use]
    pub fn with_type(mut self, normalized_type: NormalizedType) -> Self {
        self.normalized_type = Some(normalized_type);
        self
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the enabled flag
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the synchronized flag
    #[must_use]
    pub fn synchronized(mut self, synchronized: bool) -> Self {
        self.synchronized = synchronized;
        self
    }
}

// ============================================================================
// Runtime Outputs
// ============================================================================

/// Files produced for an entity during the current cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOutputs {
    pub data_file: Option<PathBuf>,
    pub deleted_file: Option<PathBuf>,
    pub resync_file: Option<PathBuf>,
}

impl RuntimeOutputs {
    /// Record the file produced for an output kind
    pub fn set(&mut self, kind: OutputKind, path: PathBuf) {
        match kind {
            OutputKind::Data => self.data_file = Some(path),
            OutputKind::Deleted => self.deleted_file = Some(path),
            OutputKind::Resync => self.resync_file = Some(path),
        }
    }

    /// Get the file produced for an output kind
    pub fn get(&self, kind: OutputKind) -> Option<&PathBuf> {
        match kind {
            OutputKind::Data => self.data_file.as_ref(),
            OutputKind::Deleted => self.deleted_file.as_ref(),
            OutputKind::Resync => self.resync_file.as_ref(),
        }
    }

    /// All produced files, in production order
    pub fn files(&self) -> Vec<PathBuf> {
        OutputKind::all()
            .into_iter()
            .filter_map(|kind| self.get(kind).cloned())
            .collect()
    }

    /// Forget every produced file
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.data_file.is_none() && self.deleted_file.is_none() && self.resync_file.is_none()
    }
}

// ============================================================================
// Entity
// ============================================================================

/// Result of applying describe output to an entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldChanges {
    /// Ids of newly discovered fields
    pub added: Vec<String>,
    /// Ids of known fields whose label or type changed
    pub updated: Vec<String>,
}

/// A syncable object type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Source-system name (e.g. `Account`)
    pub id: String,

    #[serde(default)]
    pub display_name: String,

    /// Ordered fields; order is the output column order
    #[serde(default)]
    pub fields: Vec<Field>,

    #[serde(default)]
    pub custom_config: CustomConfig,

    /// Disabled entities are skipped entirely
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(skip)]
    pub runtime_outputs: RuntimeOutputs,
}

impl Entity {
    /// Create an enabled entity with no fields
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            fields: Vec::new(),
            custom_config: CustomConfig::default(),
            enabled: true,
            runtime_outputs: RuntimeOutputs::default(),
        }
    }

    /// Append a field
    #[must_use]
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Replace the custom config
    #[must_use]
    pub fn with_custom_config(mut self, config: CustomConfig) -> Self {
        self.custom_config = config;
        self
    }

    /// Set the enabled flag
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn id_column(&self) -> &str {
        self.custom_config
            .id
            .as_deref()
            .unwrap_or(DEFAULT_ID_COLUMN)
    }

    pub fn timestamp_column(&self) -> &str {
        self.custom_config
            .timestamp
            .as_deref()
            .unwrap_or(DEFAULT_TIMESTAMP_COLUMN)
    }

    pub fn is_deleted_column(&self) -> &str {
        self.custom_config
            .is_deleted_column
            .as_deref()
            .unwrap_or(DEFAULT_IS_DELETED_COLUMN)
    }

    /// Get a field by id
    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Fields to extract this cycle, in entity order
    ///
    /// Disabled and ignored columns are dropped. When `limit` is given every
    /// listed field must exist on the entity, and only those are kept.
    pub fn selected_fields(&self, limit: Option<&[String]>) -> Result<Vec<&Field>> {
        if let Some(limit) = limit {
            let unavailable: Vec<&str> = limit
                .iter()
                .filter(|id| self.field(id).is_none())
                .map(String::as_str)
                .collect();
            if !unavailable.is_empty() {
                return Err(Error::config(format!(
                    "The following user defined fields for {} aren't available: {}",
                    self.id,
                    unavailable.join(", ")
                )));
            }
        }

        let ignored: HashSet<&str> = self
            .custom_config
            .ignored_columns
            .iter()
            .map(String::as_str)
            .collect();

        Ok(self
            .fields
            .iter()
            .filter(|f| f.enabled && !ignored.contains(f.id.as_str()))
            .filter(|f| limit.map_or(true, |l| l.iter().any(|id| *id == f.id)))
            .collect())
    }

    /// Mark the given fields as synchronized
    pub fn mark_synchronized<S: AsRef<str>>(&mut self, ids: &[S]) {
        for field in &mut self.fields {
            if ids.iter().any(|id| id.as_ref() == field.id) {
                field.synchronized = true;
            }
        }
    }

    /// Merge describe output into the field list
    ///
    /// Known fields get their label and type refreshed; new fields are
    /// appended in describe order and start unsynchronized.
    pub fn apply_descriptors(
        &mut self,
        descriptors: &[FieldDescriptor],
        enable_new: bool,
    ) -> FieldChanges {
        let mut changes = FieldChanges::default();

        for descriptor in descriptors {
            let normalized = normalize(descriptor);
            match self.fields.iter_mut().find(|f| f.id == descriptor.name) {
                Some(field) => {
                    if field.label != descriptor.label || field.normalized_type != Some(normalized)
                    {
                        field.label.clone_from(&descriptor.label);
                        field.normalized_type = Some(normalized);
                        changes.updated.push(field.id.clone());
                    }
                }
                None => {
                    self.fields.push(
                        Field::new(descriptor.name.clone())
                            .with_label(descriptor.label.clone())
                            .with_type(normalized)
                            .enabled(enable_new),
                    );
                    changes.added.push(descriptor.name.clone());
                }
            }
        }

        changes
    }
}
