//! Archival of finished output files (S3, R2, GCS, Azure, local)

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;

/// Off-box persistence for finished files
///
/// Archival is best effort: callers log failures and carry on.
#[async_trait]
pub trait BackupSink: Send + Sync {
    /// Persist a finished file, returning where it was stored
    async fn archive(&self, entity: &str, file: &Path) -> Result<String>;
}

/// Build a Hive-style partitioned key for an archived file
///
/// Format: `{entity}/dt={YYYY-MM-DD}/{file name}`
pub fn build_backup_key(entity: &str, file_name: &str, date: DateTime<Utc>) -> String {
    let sanitized_entity = entity.replace('.', "_");
    format!("{sanitized_entity}/dt={}/{file_name}", date.format("%Y-%m-%d"))
}

/// Split `bucket/some/prefix` into bucket and prefix
fn split_bucket(without_scheme: &str) -> (&str, String) {
    match without_scheme.find('/') {
        Some(idx) => (
            &without_scheme[..idx],
            without_scheme[idx + 1..].trim_end_matches('/').to_string(),
        ),
        None => (without_scheme, String::new()),
    }
}

/// Backup sink backed by an object store, parsed from a URL
#[derive(Debug, Clone)]
pub struct ObjectStoreBackup {
    /// The object store implementation
    store: Arc<dyn ObjectStore>,
    /// Key prefix within the bucket/container
    prefix: String,
    /// URL scheme, for logging
    scheme: String,
}

impl ObjectStoreBackup {
    /// Parse a destination URL and create the matching object store
    ///
    /// Supported formats:
    /// - `s3://bucket/path/` - AWS S3
    /// - `r2://bucket/path/` - Cloudflare R2 (S3-compatible)
    /// - `gs://bucket/path/` - Google Cloud Storage
    /// - `az://container/path/` - Azure Blob Storage
    /// - `/local/path/` or `file:///path/` - Local filesystem
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(rest) = url.strip_prefix("s3://") {
            Self::s3(rest, "s3")
        } else if let Some(rest) = url.strip_prefix("r2://") {
            Self::s3(rest, "r2")
        } else if let Some(rest) = url.strip_prefix("gs://") {
            let (bucket, prefix) = split_bucket(rest);
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| Error::config(format!("Failed to create GCS client: {e}")))?;
            Ok(Self::with_store(Arc::new(store), prefix, "gs"))
        } else if let Some(rest) = url.strip_prefix("az://") {
            let (container, prefix) = split_bucket(rest);
            let store = MicrosoftAzureBuilder::from_env()
                .with_container_name(container)
                .build()
                .map_err(|e| Error::config(format!("Failed to create Azure client: {e}")))?;
            Ok(Self::with_store(Arc::new(store), prefix, "az"))
        } else {
            Self::local(url.strip_prefix("file://").unwrap_or(url))
        }
    }

    /// Wrap an existing object store
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            scheme: scheme.into(),
        }
    }

    /// S3 or R2; R2 takes its endpoint from `R2_ENDPOINT_URL`
    fn s3(without_scheme: &str, scheme: &str) -> Result<Self> {
        let (bucket, prefix) = split_bucket(without_scheme);
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if scheme == "r2" {
            if let Ok(endpoint) = std::env::var("R2_ENDPOINT_URL") {
                builder = builder.with_endpoint(endpoint);
            }
        }

        let store = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to create {scheme} client: {e}")))?;
        Ok(Self::with_store(Arc::new(store), prefix, scheme))
    }

    fn local(path: &str) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::config(format!("Failed to create directory {path}: {e}")))?;
        let store = LocalFileSystem::new_with_prefix(path)
            .map_err(|e| Error::config(format!("Failed to create local store: {e}")))?;
        Ok(Self::with_store(Arc::new(store), String::new(), "file"))
    }

    /// Check if this is a remote destination (not local)
    pub fn is_remote(&self) -> bool {
        self.scheme != "file"
    }

    /// Get the scheme (s3, r2, gs, az, file)
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Write bytes under a key, returning the full location
    pub async fn put(&self, key: &str, data: Bytes) -> Result<String> {
        let path = if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{key}", self.prefix))
        };

        self.store
            .put(&path, data.into())
            .await
            .map_err(|e| Error::output(format!("Failed to write {path}: {e}")))?;

        Ok(format!("{}://{path}", self.scheme))
    }
}

#[async_trait]
impl BackupSink for ObjectStoreBackup {
    async fn archive(&self, entity: &str, file: &Path) -> Result<String> {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::output(format!("Invalid file name: {}", file.display())))?;
        let data = tokio::fs::read(file).await?;

        let key = build_backup_key(entity, file_name, Utc::now());
        self.put(&key, Bytes::from(data)).await
    }
}
