// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Solidafy Extract
//!
//! Incremental, checkpointed extraction of CRM objects into flat per-entity
//! CSV files.
//!
//! ## Features
//!
//! - **Incremental windows**: Each cycle reads `[checkpoint, now)` per entity
//! - **Bulk first**: Asynchronous bulk jobs, with one synchronous REST fallback
//! - **Soft deletes**: Deleted records land in a separate `_deleted` file
//! - **Field backfill**: Newly enabled fields are resynced over full history
//! - **Partial success**: A failing entity never blocks its siblings
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use solidafy_extract::{CheckpointStore, ExtractConfig, Extractor, FileCatalog, SalesforceConnection};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> solidafy_extract::Result<()> {
//!     let connection = SalesforceConnection::new("https://acme.my.salesforce.com", "00D...");
//!     let catalog = Arc::new(FileCatalog::from_file("catalog.yaml")?);
//!     let checkpoints = CheckpointStore::from_file("state.json")?;
//!     let config = ExtractConfig::new("out");
//!
//!     let extractor = Extractor::connect(&connection, checkpoints, catalog, config)?;
//!     let report = extractor.run_cycle(&extractor.new_context()).await?;
//!     for (entity, reason) in report.failed() {
//!         eprintln!("{entity}: {reason}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Extractor                              │
//! │  run_cycle(ctx) → CycleReport     download_entity(entity, ctx)  │
//! │  Clean → Data → Deleted → Resync → Checkpointed                 │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │ Catalog  │   Query   │    Client     │   State   │   Output    │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ Entities │ Windows   │ REST paging   │ Per-entity│ Quoted CSV  │
//! │ Fields   │ SOQL text │ Bulk jobs     │ timestamps│ Merge       │
//! │ Describe │           │ Retry / Rate  │           │ Backup      │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// HTTP client with retry and rate limiting
pub mod http;

/// Entity catalog and field metadata
pub mod catalog;

/// Field descriptor normalization
pub mod schema;

/// Per-entity checkpoints
pub mod state;

/// Time windows and query text
pub mod query;

/// REST and bulk API clients
pub mod client;

/// CSV writing, bulk result merging and backup
pub mod output;

/// Extraction lifecycle and cycle driver
pub mod engine;

/// Extraction and connection settings
pub mod config;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use catalog::{CatalogStore, Entity, Field, FileCatalog};
pub use client::{BulkClient, BulkQueryClient, QueryClient, RestQueryClient};
pub use config::{BulkBatching, BulkConfig, ExtractConfig, SalesforceConnection};
pub use engine::{CycleContext, CycleReport, EntityOutcome, Extractor, Stage};
pub use state::CheckpointStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
