//! Checkpoint state module
//!
//! Tracks the last successful load timestamp per entity.
//! State is persisted between cycles so each run only transfers the window
//! since the previous checkpoint.
//!
//! # Overview
//!
//! The state module provides:
//! - `CheckpointState` - Per-entity checkpoints
//! - `CheckpointStore` - File-based persistence with atomic writes
//! - Monotonic advancement: a checkpoint never moves backwards

mod manager;
mod types;

pub use manager::CheckpointStore;
pub use types::{CheckpointState, EntityCheckpoint};
