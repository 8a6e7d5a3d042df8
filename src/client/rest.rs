//! REST query client
//!
//! `describe`, `query` and `queryAll` over the versioned data API, following
//! `nextRecordsUrl` until the result set is `done`.

use super::types::{QueryClient, RowStream};
use crate::config::SalesforceConnection;
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::schema::FieldDescriptor;
use crate::types::Row;
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use tracing::debug;

/// One page of query results
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    next_records_url: Option<String>,
    #[serde(default)]
    records: Vec<Row>,
}

impl QueryPage {
    fn next_url(&self) -> Option<String> {
        if self.done {
            None
        } else {
            self.next_records_url.clone()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    fields: Vec<FieldDescriptor>,
}

/// Query client over the REST data API
#[derive(Debug, Clone)]
pub struct RestQueryClient {
    http: HttpClient,
    data_path: String,
    server: String,
}

impl RestQueryClient {
    /// Build a client for a connection
    pub fn new(connection: &SalesforceConnection) -> Result<Self> {
        connection.validate()?;
        let http = HttpClient::with_config(connection.http_config())?;
        Ok(Self::with_http(
            http,
            connection.data_path(),
            connection.instance_url.trim_end_matches('/'),
        ))
    }

    /// Wrap an existing HTTP client
    pub fn with_http(
        http: HttpClient,
        data_path: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            http,
            data_path: data_path.into(),
            server: server.into(),
        }
    }

    async fn paged(&self, resource: &str, soql: &str) -> Result<RowStream<'_>> {
        let url = format!("{}/{resource}", self.data_path);
        let first: QueryPage = self
            .http
            .get_json(&url, RequestConfig::new().query("q", soql))
            .await?;
        debug!(
            resource,
            total_size = first.total_size,
            "Query accepted"
        );

        let next = first.next_url();
        let first_rows = stream::iter(first.records.into_iter().map(Ok::<Row, Error>));

        let rest = stream::try_unfold(next, move |next| async move {
            let Some(url) = next else {
                return Ok::<_, Error>(None);
            };
            let page: QueryPage = self.http.get_json(&url, RequestConfig::new()).await?;
            let next = page.next_url();
            let rows = stream::iter(page.records.into_iter().map(Ok::<Row, Error>));
            Ok(Some((rows, next)))
        })
        .try_flatten();

        Ok(first_rows.chain(rest).boxed())
    }
}

#[async_trait]
impl QueryClient for RestQueryClient {
    async fn describe(&self, entity: &str) -> Result<Vec<FieldDescriptor>> {
        let url = format!("{}/sobjects/{entity}/describe", self.data_path);
        let response: DescribeResponse = self.http.get_json(&url, RequestConfig::new()).await?;
        Ok(response.fields)
    }

    async fn query(&self, soql: &str) -> Result<RowStream<'_>> {
        self.paged("query", soql).await
    }

    async fn query_all(&self, soql: &str) -> Result<RowStream<'_>> {
        self.paged("queryAll", soql).await
    }

    fn server(&self) -> String {
        self.server.clone()
    }
}
