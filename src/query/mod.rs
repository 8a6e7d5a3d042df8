//! Query building module
//!
//! Builds SOQL text for the bulk and synchronous extraction paths.
//!
//! # Overview
//!
//! - `TimeWindow` - Half-open `[from, to)` filter on the entity's timestamp column
//! - `QuerySpec` - Entity, columns, window, and scan flags for one query
//! - `build_query` - Renders a `QuerySpec` to query text

mod builder;
mod window;

pub use builder::{build_query, QuerySpec};
pub use window::{epoch_floor, format_datetime, TimeWindow};
