//! Extraction engine module
//!
//! Per-entity extraction lifecycle and the cycle driver.
//!
//! # Overview
//!
//! The engine module provides:
//! - `Extractor` - Runs the stage machine for each entity and drives whole cycles
//! - `CycleContext` - Cycle timestamp, cancellation, deadline and tracing span
//! - `CycleReport` / `ExtractionManifest` - What a cycle did and what it wrote
//!
//! Each entity moves through `Clean → DataDownload → DeletedDownload →
//! ResyncDownload → Checkpointed`. Any step failure stops the entity before
//! its checkpoint moves, so the next cycle retries the same window.

mod types;

pub use types::{
    CycleContext, CycleReport, EntityOutcome, EntityStats, ExtractionManifest, ManifestMeta,
    ManifestObject, Stage,
};

use types::{Attempt, StepOutput};

use crate::catalog::{CatalogStore, Entity, FieldChanges};
use crate::client::{BulkClient, BulkQueryClient, BulkQueryRequest, QueryClient, RestQueryClient};
use crate::config::{ExtractConfig, SalesforceConnection};
use crate::error::{Error, Result};
use crate::output::{write_rows, BackupSink, BulkResultMerger, ObjectStoreBackup};
use crate::query::{QuerySpec, TimeWindow};
use crate::state::CheckpointStore;
use crate::types::{DownloadPath, OptionStringExt, OutputKind};
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// File name of the per-cycle manifest inside the output directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Incremental extractor for a set of catalog entities
pub struct Extractor {
    query: Arc<dyn QueryClient>,
    bulk: Arc<dyn BulkClient>,
    checkpoints: CheckpointStore,
    catalog: Arc<dyn CatalogStore>,
    backup: Option<Arc<dyn BackupSink>>,
    config: ExtractConfig,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Extractor {
    /// Create an extractor from its collaborators
    pub fn new(
        query: Arc<dyn QueryClient>,
        bulk: Arc<dyn BulkClient>,
        checkpoints: CheckpointStore,
        catalog: Arc<dyn CatalogStore>,
        config: ExtractConfig,
    ) -> Self {
        Self {
            query,
            bulk,
            checkpoints,
            catalog,
            backup: None,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create an extractor talking to a live instance over HTTP
    ///
    /// The backup sink is built from `config.backup_url` when set.
    pub fn connect(
        connection: &SalesforceConnection,
        checkpoints: CheckpointStore,
        catalog: Arc<dyn CatalogStore>,
        config: ExtractConfig,
    ) -> Result<Self> {
        config.validate()?;
        let query = RestQueryClient::new(connection)?;
        let bulk = BulkQueryClient::new(connection, config.bulk.clone())?;
        let backup = config
            .backup_url
            .as_deref()
            .map(ObjectStoreBackup::parse)
            .transpose()?;

        let mut extractor = Self::new(
            Arc::new(query),
            Arc::new(bulk),
            checkpoints,
            catalog,
            config,
        );
        if let Some(backup) = backup {
            extractor = extractor.with_backup(Arc::new(backup));
        }
        Ok(extractor)
    }

    /// Hand finished files to a backup sink
    #[must_use]
    pub fn with_backup(mut self, backup: Arc<dyn BackupSink>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Context for a cycle starting now, carrying the configured deadline
    pub fn new_context(&self) -> CycleContext {
        let ctx = CycleContext::start();
        match self.config.deadline() {
            Some(deadline) => ctx.with_deadline(deadline),
            None => ctx,
        }
    }

    // ========================================================================
    // Cycle Driver
    // ========================================================================

    /// Run one sync cycle over every enabled catalog entity
    ///
    /// Entity failures are collected in the report; only catalog or
    /// manifest failures fail the cycle itself.
    pub async fn run_cycle(&self, ctx: &CycleContext) -> Result<CycleReport> {
        self.run_cycle_inner(ctx)
            .instrument(ctx.span().clone())
            .await
    }

    async fn run_cycle_inner(&self, ctx: &CycleContext) -> Result<CycleReport> {
        let started = Instant::now();
        let (enabled, disabled): (Vec<Entity>, Vec<Entity>) = self
            .catalog
            .entities()
            .await?
            .into_iter()
            .partition(|e| e.enabled);

        let skipped: Vec<String> = disabled.into_iter().map(|e| e.id).collect();
        for id in &skipped {
            debug!(entity = %id, "Skipping disabled entity");
        }
        info!(
            entities = enabled.len(),
            skipped = skipped.len(),
            concurrency = self.config.concurrency,
            "Starting sync cycle"
        );

        let results: Vec<(Entity, Result<EntityStats>)> = stream::iter(enabled)
            .map(|mut entity| async move {
                let result = self.process_entity(&mut entity, ctx).await;
                (entity, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut manifest = ExtractionManifest::new(self.query.server(), ctx.now());
        let mut report = CycleReport {
            now: ctx.now(),
            entities: Default::default(),
            skipped,
            manifest_path: None,
        };

        for (entity, result) in results {
            let outcome = match result {
                Ok(stats) => {
                    if let Err(e) = self.catalog.save_entity(&entity).await {
                        error!(entity = %entity.id, error = %e, "Failed to persist entity");
                    }
                    manifest.add(
                        entity.id.clone(),
                        stats.columns.clone(),
                        absolute_paths(&stats.files).await,
                    );
                    EntityOutcome::Advanced {
                        checkpoint: stats.checkpoint.unwrap_or_else(|| ctx.now()),
                        stats,
                    }
                }
                Err(e) => {
                    error!(entity = %entity.id, error = %e, "Entity extraction failed");
                    EntityOutcome::failed(&e)
                }
            };
            report.entities.insert(entity.id, outcome);
        }

        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let manifest_path = self.config.output_dir.join(MANIFEST_FILE);
        manifest.write(&manifest_path).await?;
        report.manifest_path = Some(manifest_path);

        info!(
            advanced = report.advanced().len(),
            failed = report.failed().len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Optional describe refresh, then the download lifecycle
    async fn process_entity(&self, entity: &mut Entity, ctx: &CycleContext) -> Result<EntityStats> {
        if self.config.refresh_fields {
            match ctx.guard(self.refresh_fields(entity)).await {
                Ok(changes) => {
                    if !changes.added.is_empty() {
                        if let Err(e) = self.catalog.save_entity(entity).await {
                            warn!(entity = %entity.id, error = %e, "Failed to persist discovered fields");
                        }
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(entity = %entity.id, error = %e, "Describe failed, using catalog fields");
                }
            }
        }
        self.download_entity(entity, ctx).await
    }

    /// Refresh an entity's fields from the describe API
    ///
    /// Disabled entities are never described.
    pub async fn refresh_fields(&self, entity: &mut Entity) -> Result<FieldChanges> {
        if !entity.enabled {
            debug!(entity = %entity.id, "Not describing disabled entity");
            return Ok(FieldChanges::default());
        }

        let descriptors = self.query.describe(&entity.id).await?;
        let changes = entity.apply_descriptors(&descriptors, self.config.auto_enable_new_fields);
        if !changes.added.is_empty() || !changes.updated.is_empty() {
            info!(
                entity = %entity.id,
                added = ?changes.added,
                updated = changes.updated.len(),
                "Entity fields refreshed"
            );
        }
        Ok(changes)
    }

    // ========================================================================
    // Per-Entity Lifecycle
    // ========================================================================

    /// Run every stage for one entity
    ///
    /// On success the checkpoint is at least `ctx.now()`, `entity.runtime_outputs`
    /// lists the produced files, and the synchronized flags are updated on
    /// `entity` (the caller persists them).
    pub async fn download_entity(
        &self,
        entity: &mut Entity,
        ctx: &CycleContext,
    ) -> Result<EntityStats> {
        let span = tracing::info_span!(parent: ctx.span(), "entity", entity = %entity.id);
        self.download_entity_inner(entity, ctx).instrument(span).await
    }

    async fn download_entity_inner(
        &self,
        entity: &mut Entity,
        ctx: &CycleContext,
    ) -> Result<EntityStats> {
        let lock = self.entity_lock(&entity.id);
        let _guard = lock.lock().await;
        let started = Instant::now();

        // Every query is built before anything touches the network
        let columns: Vec<String> = entity
            .selected_fields(self.config.field_limit(&entity.id))?
            .into_iter()
            .map(|f| f.id.clone())
            .collect();
        let checkpoint = self.checkpoints.last_load(&entity.id).await;
        let window = TimeWindow::new(checkpoint.unwrap_or(self.config.epoch_floor), ctx.now());
        let data_query = QuerySpec::new(entity, columns.iter(), window).build()?;

        let deleted_columns = deleted_columns(entity);
        let deleted_query = QuerySpec::new(entity, deleted_columns.iter(), window)
            .deleted_only(true)
            .build()?;

        let resync_fields: Vec<String> = match checkpoint {
            Some(_) => entity
                .selected_fields(self.config.field_limit(&entity.id))?
                .into_iter()
                .filter(|f| !f.synchronized && f.id != entity.id_column())
                .map(|f| f.id.clone())
                .collect(),
            None => Vec::new(),
        };
        let resync_columns: Vec<String> = std::iter::once(entity.id_column().to_string())
            .chain(resync_fields.iter().cloned())
            .collect();
        let resync_query = QuerySpec::new(entity, resync_columns.iter(), window)
            .full_scan(true)
            .build()?;

        info!(window = %window, columns = columns.len(), "Extracting entity");

        let mut stats = EntityStats {
            columns: columns.clone(),
            ..EntityStats::default()
        };
        let mut stage = Stage::Clean;
        loop {
            ctx.check()?;
            debug!(%stage, "Entering stage");

            match stage {
                Stage::Clean => self.clean(entity).await?,
                Stage::DataDownload => {
                    let output = self
                        .download_with_fallback(entity, stage, &data_query, &columns, window, ctx)
                        .await?;
                    stats.data_rows = output.rows;
                    stats.data_path = Some(output.via);
                    entity.runtime_outputs.set(OutputKind::Data, output.path);
                }
                Stage::DeletedDownload => {
                    let output = self
                        .download_deleted(entity, &deleted_query, &deleted_columns, ctx)
                        .await?;
                    stats.deleted_rows = output.rows;
                    entity.runtime_outputs.set(OutputKind::Deleted, output.path);
                }
                Stage::ResyncDownload => {
                    if resync_fields.is_empty() {
                        debug!("No unsynchronized fields");
                    } else {
                        info!(fields = ?resync_fields, "Backfilling unsynchronized fields");
                        let output = self
                            .download_with_fallback(
                                entity,
                                stage,
                                &resync_query,
                                &resync_columns,
                                window,
                                ctx,
                            )
                            .await?;
                        stats.resync_rows = output.rows;
                        stats.resync_path = Some(output.via);
                        stats.resynced_fields.clone_from(&resync_fields);
                        entity.runtime_outputs.set(OutputKind::Resync, output.path);
                    }
                }
                Stage::Checkpointed => {
                    stats.checkpoint = if self.checkpoints.advance(&entity.id, ctx.now()).await? {
                        Some(ctx.now())
                    } else {
                        self.checkpoints.last_load(&entity.id).await
                    };
                    if checkpoint.is_none() {
                        entity.mark_synchronized(&columns);
                    } else {
                        entity.mark_synchronized(&resync_fields);
                    }
                }
            }

            match stage.next() {
                Some(next) => stage = next,
                None => break,
            }
        }

        stats.files = entity.runtime_outputs.files();
        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            data_rows = stats.data_rows,
            deleted_rows = stats.deleted_rows,
            resync_rows = stats.resync_rows,
            checkpoint = ?stats.checkpoint,
            "Entity checkpointed"
        );

        self.archive(entity).await;
        Ok(stats)
    }

    /// Remove last cycle's outputs and any stray partial files
    async fn clean(&self, entity: &mut Entity) -> Result<()> {
        entity.runtime_outputs.clear();
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        for kind in OutputKind::all() {
            let path = self.output_path(kind, &entity.id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(file = %path.display(), "Removed previous output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            remove_partials(&self.config.output_dir, &self.file_stem(kind, &entity.id)).await?;
        }
        Ok(())
    }

    /// Bulk attempt, then one synchronous fallback with the same query text
    async fn download_with_fallback(
        &self,
        entity: &Entity,
        stage: Stage,
        soql: &str,
        columns: &[String],
        window: TimeWindow,
        ctx: &CycleContext,
    ) -> Result<StepOutput> {
        let kind = stage.output_kind().unwrap_or(OutputKind::Data);
        let output = self.output_path(kind, &entity.id);
        let request = BulkQueryRequest {
            entity: entity.id.clone(),
            soql: soql.to_string(),
            window,
            batching: self.config.bulk.batching,
            output_dir: self.config.output_dir.clone(),
            file_stem: self.file_stem(kind, &entity.id),
        };

        let mut attempt = Attempt::Bulk;
        loop {
            match attempt {
                Attempt::Bulk => {
                    let result = ctx
                        .guard(self.bulk.submit_query(&request, ctx.cancel_token()))
                        .await;
                    let result = match result {
                        Ok(files) => merge_partials(files, output.clone(), columns.to_vec()).await,
                        Err(e) => Err(e),
                    };

                    match result {
                        Ok(rows) => {
                            return Ok(StepOutput {
                                path: output,
                                rows,
                                via: DownloadPath::Bulk,
                            })
                        }
                        Err(e) if e.is_cancelled() => {
                            remove_partials(&self.config.output_dir, &request.file_stem).await?;
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(
                                step = %kind,
                                error = %e,
                                "Batch download failed. Now downloading through REST api instead"
                            );
                            remove_partials(&self.config.output_dir, &request.file_stem).await?;
                            attempt = Attempt::Fallback {
                                bulk_error: e.to_string(),
                            };
                        }
                    }
                }
                Attempt::Fallback { bulk_error } => {
                    let result = ctx
                        .guard(async {
                            let rows = self.query.query(soql).await?;
                            write_rows(rows, &output, columns).await
                        })
                        .await;

                    return match result {
                        Ok(rows) => Ok(StepOutput {
                            path: output,
                            rows,
                            via: DownloadPath::Synchronous,
                        }),
                        Err(e) if e.is_cancelled() => Err(e),
                        Err(e) => Err(Error::download(
                            &entity.id,
                            stage.to_string(),
                            format!("bulk path: {bulk_error}; synchronous path: {e}"),
                        )),
                    };
                }
            }
        }
    }

    /// Soft-deleted records, through `queryAll` only
    async fn download_deleted(
        &self,
        entity: &Entity,
        soql: &str,
        columns: &[String],
        ctx: &CycleContext,
    ) -> Result<StepOutput> {
        let output = self.output_path(OutputKind::Deleted, &entity.id);
        let result = ctx
            .guard(async {
                let rows = self.query.query_all(soql).await?;
                write_rows(rows, &output, columns).await
            })
            .await;

        match result {
            Ok(rows) => Ok(StepOutput {
                path: output,
                rows,
                via: DownloadPath::Synchronous,
            }),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Err(Error::download(
                &entity.id,
                Stage::DeletedDownload.to_string(),
                e.to_string(),
            )),
        }
    }

    /// Best-effort archival; failures never undo the checkpoint
    async fn archive(&self, entity: &Entity) {
        let Some(backup) = &self.backup else {
            return;
        };
        for file in entity.runtime_outputs.files() {
            match backup.archive(&entity.id, &file).await {
                Ok(location) => debug!(file = %file.display(), %location, "Archived output"),
                Err(e) => warn!(file = %file.display(), error = %e, "Backup failed"),
            }
        }
    }

    fn entity_lock(&self, entity: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(entity.to_string()).or_default())
    }

    fn prefix(&self) -> Option<String> {
        self.config.filename_prefix.clone().none_if_empty()
    }

    fn file_stem(&self, kind: OutputKind, entity: &str) -> String {
        kind.file_stem(self.prefix().as_deref(), entity)
    }

    fn output_path(&self, kind: OutputKind, entity: &str) -> PathBuf {
        self.config
            .output_dir
            .join(kind.file_name(self.prefix().as_deref(), entity))
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .field("has_backup", &self.backup.is_some())
            .finish_non_exhaustive()
    }
}

/// Id, timestamp and deleted-flag columns, without duplicates
fn deleted_columns(entity: &Entity) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(3);
    for column in [
        entity.id_column(),
        entity.timestamp_column(),
        entity.is_deleted_column(),
    ] {
        if !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
    }
    columns
}

/// Merge partial files off the async runtime
async fn merge_partials(files: Vec<PathBuf>, output: PathBuf, header: Vec<String>) -> Result<usize> {
    let summary = tokio::task::spawn_blocking(move || {
        BulkResultMerger::new().merge(&files, &output, &header)
    })
    .await
    .map_err(|e| Error::output(format!("Merge task failed: {e}")))??;

    debug!(
        rows = summary.rows,
        merged = summary.files_merged,
        skipped = summary.files_skipped,
        "Bulk results merged"
    );
    Ok(summary.rows)
}

/// Delete `<stem>.part*.csv` files left in `dir`
async fn remove_partials(dir: &Path, stem: &str) -> Result<()> {
    let marker = format!("{stem}.part");
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(&marker) && name.ends_with(".csv") {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

async fn absolute_paths(files: &[PathBuf]) -> Vec<PathBuf> {
    let mut absolute = Vec::with_capacity(files.len());
    for file in files {
        absolute.push(
            tokio::fs::canonicalize(file)
                .await
                .unwrap_or_else(|_| file.clone()),
        );
    }
    absolute
}

#[cfg(test)]
mod tests;
