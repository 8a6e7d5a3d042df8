//! SOQL text builder

use super::window::{format_datetime, TimeWindow};
use crate::catalog::Entity;
use crate::error::{Error, Result};

/// Everything needed to render one extraction query
///
/// Identifiers are taken from the catalog as-is; no quoting or escaping is
/// applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    /// Entity id used in the FROM clause
    pub entity: String,
    /// Selected columns, in output order
    pub fields: Vec<String>,
    /// Column filtered by the time window
    pub timestamp_column: String,
    /// Soft-delete flag column
    pub is_deleted_column: String,
    pub window: TimeWindow,
    /// Only select soft-deleted records
    pub deleted_only: bool,
    /// Ignore the time window
    pub full_scan: bool,
}

impl QuerySpec {
    /// Create an incremental query over `window` for the given columns
    pub fn new<I, S>(entity: &Entity, fields: I, window: TimeWindow) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity: entity.id.clone(),
            fields: fields.into_iter().map(Into::into).collect(),
            timestamp_column: entity.timestamp_column().to_string(),
            is_deleted_column: entity.is_deleted_column().to_string(),
            window,
            deleted_only: false,
            full_scan: false,
        }
    }

    /// Only select soft-deleted records
    #[must_use]
    pub fn deleted_only(mut self, deleted_only: bool) -> Self {
        self.deleted_only = deleted_only;
        self
    }

    /// Ignore the time window
    #[must_use]
    pub fn full_scan(mut self, full_scan: bool) -> Self {
        self.full_scan = full_scan;
        self
    }

    /// Render the query text
    pub fn build(&self) -> Result<String> {
        build_query(self)
    }
}

/// Render a query spec to SOQL text
///
/// Fails with a configuration error when no columns are selected.
pub fn build_query(spec: &QuerySpec) -> Result<String> {
    if spec.fields.is_empty() {
        return Err(Error::config(format!(
            "Entity '{}' has no enabled fields to query",
            spec.entity
        )));
    }

    let mut query = format!("SELECT {} FROM {}", spec.fields.join(", "), spec.entity);

    let mut conditions = Vec::new();
    if !spec.full_scan {
        conditions.push(format!(
            "{} >= {}",
            spec.timestamp_column,
            format_datetime(&spec.window.from)
        ));
        conditions.push(format!(
            "{} < {}",
            spec.timestamp_column,
            format_datetime(&spec.window.to)
        ));
    }
    if spec.deleted_only {
        conditions.push(format!("{} = true", spec.is_deleted_column));
    }

    if !conditions.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&conditions.join(" AND "));
    }

    Ok(query)
}
