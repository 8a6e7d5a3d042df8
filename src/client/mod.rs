//! CRM API clients
//!
//! The extraction engine talks to the remote system through two traits:
//! `QueryClient` (describe plus row-streaming queries) and `BulkClient`
//! (asynchronous query jobs that land as partial CSV files). Both have
//! HTTP implementations here; tests substitute in-memory fakes.

mod bulk;
mod rest;
mod types;

pub use bulk::{BulkJobState, BulkQueryClient};
pub use rest::RestQueryClient;
pub use types::{BulkClient, BulkQueryRequest, QueryClient, RowStream};
