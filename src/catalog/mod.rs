//! Catalog module
//!
//! Entity definitions, field lists, and per-entity custom configuration.
//!
//! # Overview
//!
//! The catalog module provides:
//! - `Entity` / `Field` - The syncable object types and their columns
//! - `CustomConfig` - Column-name overrides (id, timestamp, deleted flag)
//! - `CatalogStore` - Trait for loading entities and saving field flags
//! - `FileCatalog` - YAML/JSON file implementation with atomic writes

mod store;
mod types;

pub use store::{CatalogDocument, CatalogStore, FileCatalog};
pub use types::{CustomConfig, Entity, Field, FieldChanges, HistoryMode, RuntimeOutputs};
