//! Collaborator traits

use crate::config::BulkBatching;
use crate::error::Result;
use crate::query::TimeWindow;
use crate::schema::FieldDescriptor;
use crate::types::Row;
use async_trait::async_trait;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Lazily paged rows returned by a query
pub type RowStream<'a> = Pin<Box<dyn Stream<Item = Result<Row>> + Send + 'a>>;

/// Row-streaming query API
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Field descriptors for an entity
    async fn describe(&self, entity: &str) -> Result<Vec<FieldDescriptor>>;

    /// Run a query over live records
    ///
    /// The first page is fetched before returning, so a rejected query
    /// fails here rather than inside the stream.
    async fn query(&self, soql: &str) -> Result<RowStream<'_>>;

    /// Run a query that also sees soft-deleted records
    async fn query_all(&self, soql: &str) -> Result<RowStream<'_>>;

    /// Identifier of the remote server, recorded in the manifest
    fn server(&self) -> String {
        String::new()
    }
}

/// One bulk query submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkQueryRequest {
    /// Entity being extracted
    pub entity: String,
    /// Query text, identical to the synchronous fallback's
    pub soql: String,
    /// Window the query filters on
    pub window: TimeWindow,
    /// Page size hint
    pub batching: BulkBatching,
    /// Directory receiving the partial files
    pub output_dir: PathBuf,
    /// Partial files are named `<file_stem>.part<NNNN>.csv`
    pub file_stem: String,
}

impl BulkQueryRequest {
    /// Path of the n-th partial file (1-based)
    pub fn partial_path(&self, page: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}.part{page:04}.csv", self.file_stem))
    }
}

/// Asynchronous bulk query API
#[async_trait]
pub trait BulkClient: Send + Sync {
    /// Run a query job to completion and download its results
    ///
    /// Returns the partial files in page order. Any failure means the
    /// bulk path is unavailable for this query.
    async fn submit_query(
        &self,
        request: &BulkQueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>>;
}
