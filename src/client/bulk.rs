//! Bulk query client
//!
//! Runs query jobs through the bulk API: create the job, poll its state,
//! then page through the CSV results using the `Sforce-Locator` header.
//! Each result page lands in its own partial file.

use super::types::{BulkClient, BulkQueryRequest};
use crate::config::{BulkConfig, SalesforceConnection};
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::output::EMPTY_RESULT_SENTINEL;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Header carrying the cursor to the next result page
const LOCATOR_HEADER: &str = "Sforce-Locator";

/// Lifecycle state of a bulk query job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkJobState {
    /// Accepted, not yet running
    Queued,
    /// Running
    InProgress,
    /// Results are ready
    Completed,
    /// Failed or aborted, with the server's reason
    Failed(String),
}

impl BulkJobState {
    /// Map a job info payload to a state
    fn from_info(info: &JobInfo) -> Self {
        match info.state.as_str() {
            "JobComplete" => Self::Completed,
            "InProgress" => Self::InProgress,
            "Failed" | "Aborted" => Self::Failed(match &info.error_message {
                Some(message) => format!("{}: {message}", info.state),
                None => info.state.clone(),
            }),
            _ => Self::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobInfo {
    id: String,
    state: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    number_records_processed: Option<u64>,
}

/// Bulk client over the query jobs API
#[derive(Debug, Clone)]
pub struct BulkQueryClient {
    http: HttpClient,
    jobs_path: String,
    settings: BulkConfig,
}

impl BulkQueryClient {
    /// Build a client for a connection
    pub fn new(connection: &SalesforceConnection, settings: BulkConfig) -> Result<Self> {
        connection.validate()?;
        let http = HttpClient::with_config(connection.http_config())?;
        Ok(Self::with_http(http, connection.data_path(), settings))
    }

    /// Wrap an existing HTTP client
    pub fn with_http(http: HttpClient, data_path: impl AsRef<str>, settings: BulkConfig) -> Self {
        Self {
            http,
            jobs_path: format!("{}/jobs/query", data_path.as_ref()),
            settings,
        }
    }

    async fn create_job(&self, soql: &str) -> Result<JobInfo> {
        self.http
            .post_json(
                &self.jobs_path,
                json!({
                    "operation": "query",
                    "query": soql,
                    "contentType": "CSV",
                    "columnDelimiter": "COMMA",
                    "lineEnding": "LF",
                }),
            )
            .await
    }

    /// Poll until the job completes, fails, or the poll budget runs out
    async fn wait_for_completion(&self, job_id: &str, cancel: &CancellationToken) -> Result<()> {
        let url = format!("{}/{job_id}", self.jobs_path);
        let max_attempts = self.settings.max_poll_attempts;

        for attempt in 1..=max_attempts {
            let info: JobInfo = self.http.get_json(&url, RequestConfig::new()).await?;
            match BulkJobState::from_info(&info) {
                BulkJobState::Completed => {
                    debug!(
                        job_id,
                        records = info.number_records_processed.unwrap_or_default(),
                        "Bulk job complete"
                    );
                    return Ok(());
                }
                BulkJobState::Failed(reason) => {
                    return Err(Error::bulk_job(format!("job {job_id} {reason}")));
                }
                state => debug!(job_id, attempt, ?state, "Bulk job not ready"),
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    self.abort_job(job_id).await;
                    return Err(Error::cancelled(format!("bulk job {job_id} abandoned")));
                }
                () = tokio::time::sleep(self.settings.poll_interval()) => {}
            }
        }

        self.abort_job(job_id).await;
        Err(Error::bulk_job(format!(
            "job {job_id} timed out after {max_attempts} polls"
        )))
    }

    /// Best-effort abort so an abandoned job stops consuming quota
    async fn abort_job(&self, job_id: &str) {
        let url = format!("{}/{job_id}", self.jobs_path);
        let result = self
            .http
            .request(
                Method::PATCH,
                &url,
                RequestConfig::new().json(json!({"state": "Aborted"})).retries(0),
            )
            .await;
        if let Err(e) = result {
            warn!(job_id, error = %e, "Failed to abort bulk job");
        }
    }

    /// Download every result page into its own partial file
    async fn download_results(
        &self,
        job_id: &str,
        request: &BulkQueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let url = format!("{}/{job_id}/results", self.jobs_path);
        let mut files = Vec::new();
        let mut locator: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!(
                    "bulk results for job {job_id} abandoned"
                )));
            }

            let mut config = RequestConfig::new().header("Accept", "text/csv");
            if let Some(max_records) = request.batching.max_records() {
                config = config.query("maxRecords", max_records.to_string());
            }
            if let Some(ref l) = locator {
                config = config.query("locator", l.clone());
            }

            let response = self.http.get(&url, config).await?;
            let next = response
                .headers()
                .get(LOCATOR_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty() && *v != "null")
                .map(String::from);
            let body = response.bytes().await?;

            let path = request.partial_path(files.len() + 1);
            if body.iter().all(u8::is_ascii_whitespace) {
                tokio::fs::write(&path, EMPTY_RESULT_SENTINEL).await?;
            } else {
                tokio::fs::write(&path, &body).await?;
            }
            files.push(path);

            match next {
                Some(l) => locator = Some(l),
                None => break,
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl BulkClient for BulkQueryClient {
    async fn submit_query(
        &self,
        request: &BulkQueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let job = self.create_job(&request.soql).await?;
        info!(entity = %request.entity, job_id = %job.id, window = %request.window, "Bulk job created");

        self.wait_for_completion(&job.id, cancel).await?;
        let files = self.download_results(&job.id, request, cancel).await?;

        debug!(entity = %request.entity, pages = files.len(), "Bulk results downloaded");
        Ok(files)
    }
}
