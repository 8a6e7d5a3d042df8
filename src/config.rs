//! Configuration types
//!
//! `ExtractConfig` drives a sync cycle; `SalesforceConnection` configures the
//! bundled HTTP collaborators. Both load from YAML or JSON.

use crate::error::{Error, Result};
use crate::http::{HttpClientConfig, RateLimiterConfig};
use crate::query::epoch_floor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Extraction Config
// ============================================================================

/// Settings for one extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Directory receiving every output and partial file
    pub output_dir: PathBuf,

    /// Prepended, with `_`, to every file name
    #[serde(default)]
    pub filename_prefix: Option<String>,

    /// Entities processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Window start for entities without a checkpoint
    #[serde(default = "epoch_floor")]
    pub epoch_floor: DateTime<Utc>,

    /// Bulk job settings
    #[serde(default)]
    pub bulk: BulkConfig,

    /// Per-entity restriction of the selected fields
    #[serde(default)]
    pub field_limits: HashMap<String, Vec<String>>,

    /// Describe each enabled entity before downloading
    #[serde(default)]
    pub refresh_fields: bool,

    /// Whether fields discovered by describe start enabled
    #[serde(default)]
    pub auto_enable_new_fields: bool,

    /// Abort the cycle after this many seconds
    #[serde(default)]
    pub deadline_seconds: Option<u64>,

    /// Backup destination URL (`s3://`, `gs://`, `az://`, `r2://`, local path)
    #[serde(default)]
    pub backup_url: Option<String>,
}

fn default_concurrency() -> usize {
    4
}

impl ExtractConfig {
    /// Create a config with defaults for everything but the output directory
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            filename_prefix: None,
            concurrency: default_concurrency(),
            epoch_floor: epoch_floor(),
            bulk: BulkConfig::default(),
            field_limits: HashMap::new(),
            refresh_fields: false,
            auto_enable_new_fields: false,
            deadline_seconds: None,
            backup_url: None,
        }
    }

    /// Parse and validate a YAML (or JSON) document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    #[must_use]
    pub fn with_filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_bulk(mut self, bulk: BulkConfig) -> Self {
        self.bulk = bulk;
        self
    }

    /// Restrict an entity to the listed fields
    #[must_use]
    pub fn with_field_limit<I, S>(mut self, entity: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_limits
            .insert(entity.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_refresh_fields(mut self, refresh: bool, auto_enable: bool) -> Self {
        self.refresh_fields = refresh;
        self.auto_enable_new_fields = auto_enable;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_seconds = Some(deadline.as_secs());
        self
    }

    /// Field limit for an entity, if one is configured
    pub fn field_limit(&self, entity: &str) -> Option<&[String]> {
        self.field_limits.get(entity).map(Vec::as_slice)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_seconds.map(Duration::from_secs)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::missing_field("output_dir"));
        }
        if self.concurrency == 0 {
            return Err(Error::invalid_value("concurrency", "must be at least 1"));
        }
        if self.bulk.poll_interval_ms == 0 {
            return Err(Error::invalid_value(
                "bulk.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.bulk.max_poll_attempts == 0 {
            return Err(Error::invalid_value(
                "bulk.max_poll_attempts",
                "must be greater than zero",
            ));
        }
        if let Some(prefix) = &self.filename_prefix {
            if prefix.contains(['/', '\\']) {
                return Err(Error::invalid_value(
                    "filename_prefix",
                    "must not contain path separators",
                ));
            }
        }
        Ok(())
    }
}

/// Bulk job polling and batching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Delay between job status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polls before the job is abandoned
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Batching hint passed with every job
    #[serde(default)]
    pub batching: BulkBatching,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            batching: BulkBatching::default(),
        }
    }
}

impl BulkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_poll_attempts() -> u32 {
    720
}

/// How bulk results are split into partial files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum BulkBatching {
    /// Let the server choose the page size
    #[default]
    Auto,
    /// Cap the records per result page
    MaxRecords { max_records: u32 },
}

impl BulkBatching {
    /// Value for the `maxRecords` result parameter
    pub fn max_records(self) -> Option<u32> {
        match self {
            Self::Auto => None,
            Self::MaxRecords { max_records } => Some(max_records),
        }
    }
}

// ============================================================================
// Connection Config
// ============================================================================

/// Where and how to reach the CRM API
#[derive(Clone, Serialize, Deserialize)]
pub struct SalesforceConnection {
    /// Instance base URL, e.g. `https://acme.my.salesforce.com`
    pub instance_url: String,

    /// OAuth access token, used as a bearer token
    pub access_token: String,

    /// Data API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Sustained request rate
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_api_version() -> String {
    "29.0".to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_requests_per_second() -> u32 {
    20
}

impl std::fmt::Debug for SalesforceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceConnection")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"***")
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl SalesforceConnection {
    pub fn new(instance_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            instance_url: instance_url.into(),
            access_token: access_token.into(),
            api_version: default_api_version(),
            timeout_seconds: default_timeout_seconds(),
            requests_per_second: default_requests_per_second(),
        }
    }

    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Check that the mandatory values are present and usable
    pub fn validate(&self) -> Result<()> {
        if self.instance_url.trim().is_empty() {
            return Err(Error::missing_field("instance_url"));
        }
        if self.access_token.trim().is_empty() {
            return Err(Error::missing_field("access_token"));
        }
        url::Url::parse(&self.instance_url)?;
        if self.api_version.parse::<f32>().is_err() {
            return Err(Error::invalid_value(
                "api_version",
                format!("'{}' is not a version number", self.api_version),
            ));
        }
        Ok(())
    }

    /// Root of the versioned data API, e.g. `/services/data/v29.0`
    pub fn data_path(&self) -> String {
        format!("/services/data/v{}", self.api_version)
    }

    /// HTTP client settings for this connection
    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig::builder()
            .base_url(self.instance_url.trim_end_matches('/'))
            .bearer_token(&self.access_token)
            .timeout(Duration::from_secs(self.timeout_seconds))
            .rate_limit(RateLimiterConfig::new(
                self.requests_per_second,
                self.requests_per_second,
            ))
            .build()
    }
}
