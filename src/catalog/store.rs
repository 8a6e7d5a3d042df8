//! Catalog store implementation
//!
//! Provides file-based catalog persistence with atomic writes.

use super::types::Entity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Source of entity definitions and sink for field flag updates
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Load every entity definition, enabled or not
    async fn entities(&self) -> Result<Vec<Entity>>;

    /// Persist an entity's definition (fields and their flags)
    async fn save_entity(&self, entity: &Entity) -> Result<()>;
}

/// On-disk catalog document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl CatalogDocument {
    /// Parse a catalog from YAML (JSON is valid YAML)
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let doc: CatalogDocument = serde_yaml::from_str(yaml)
            .map_err(|e| Error::catalog(format!("Failed to parse catalog: {e}")))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Reject catalogs with blank or duplicate entity ids
    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entity in &self.entities {
            if entity.id.is_empty() {
                return Err(Error::config("Entity id cannot be empty"));
            }
            if !seen.insert(entity.id.as_str()) {
                return Err(Error::config(format!(
                    "Duplicate entity id in catalog: {}",
                    entity.id
                )));
            }
        }
        Ok(())
    }
}

/// Catalog backed by a YAML or JSON file
#[derive(Debug, Clone)]
pub struct FileCatalog {
    /// Path to the catalog file (empty for in-memory)
    path: PathBuf,
    /// Current document (cached)
    doc: Arc<RwLock<CatalogDocument>>,
}

impl FileCatalog {
    /// Create an in-memory catalog (no file persistence)
    pub fn in_memory(entities: Vec<Entity>) -> Self {
        Self {
            path: PathBuf::new(),
            doc: Arc::new(RwLock::new(CatalogDocument { entities })),
        }
    }

    /// Load a catalog from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            Error::catalog(format!(
                "Failed to read catalog file '{}': {e}",
                path.display()
            ))
        })?;
        let doc = CatalogDocument::from_yaml_str(&contents)?;

        Ok(Self {
            path,
            doc: Arc::new(RwLock::new(doc)),
        })
    }

    /// Get the catalog file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Save the document, preserving the file's format
    async fn save(&self, doc: &CatalogDocument) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }

        let is_json = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let contents = if is_json {
            serde_json::to_string_pretty(doc)
                .map_err(|e| Error::catalog(format!("Failed to serialize catalog: {e}")))?
        } else {
            serde_yaml::to_string(doc)
                .map_err(|e| Error::catalog(format!("Failed to serialize catalog: {e}")))?
        };

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::catalog(format!("Failed to write catalog file: {e}")))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::catalog(format!("Failed to rename catalog file: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl CatalogStore for FileCatalog {
    async fn entities(&self) -> Result<Vec<Entity>> {
        Ok(self.doc.read().await.entities.clone())
    }

    async fn save_entity(&self, entity: &Entity) -> Result<()> {
        let mut doc = self.doc.write().await;
        match doc.entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => {
                *existing = entity.clone();
                existing.runtime_outputs.clear();
            }
            None => {
                return Err(Error::catalog(format!(
                    "Entity '{}' is not in the catalog",
                    entity.id
                )))
            }
        }
        self.save(&doc).await
    }
}
