//! Tests for the extraction engine

use super::*;
use crate::catalog::{Field, FileCatalog};
use crate::client::RowStream;
use crate::output::EMPTY_RESULT_SENTINEL;
use crate::schema::FieldDescriptor;
use crate::types::Row;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fakes
// ============================================================================

/// Entity id named in a query's FROM clause
fn entity_of(soql: &str) -> String {
    soql.split(" FROM ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

#[derive(Default)]
struct FakeQuery {
    rows: HashMap<String, Vec<Row>>,
    deleted_rows: HashMap<String, Vec<Row>>,
    failing: HashSet<String>,
    failing_query_all: HashSet<String>,
    /// Reject queries without a WHERE clause (full-history backfills)
    failing_full_scans: bool,
    descriptors: HashMap<String, Vec<FieldDescriptor>>,
    queries: Mutex<Vec<String>>,
    query_alls: Mutex<Vec<String>>,
    describes: Mutex<Vec<String>>,
}

impl FakeQuery {
    fn with_rows(mut self, entity: &str, rows: Vec<serde_json::Value>) -> Self {
        self.rows.insert(entity.to_string(), to_rows(rows));
        self
    }

    fn with_deleted(mut self, entity: &str, rows: Vec<serde_json::Value>) -> Self {
        self.deleted_rows.insert(entity.to_string(), to_rows(rows));
        self
    }

    fn failing(mut self, entity: &str) -> Self {
        self.failing.insert(entity.to_string());
        self
    }

    fn failing_full_scans(mut self) -> Self {
        self.failing_full_scans = true;
        self
    }

    fn failing_query_all(mut self, entity: &str) -> Self {
        self.failing_query_all.insert(entity.to_string());
        self
    }

    fn with_descriptors(mut self, entity: &str, descriptors: Vec<FieldDescriptor>) -> Self {
        self.descriptors.insert(entity.to_string(), descriptors);
        self
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn query_alls(&self) -> Vec<String> {
        self.query_alls.lock().unwrap().clone()
    }

    fn describes(&self) -> Vec<String> {
        self.describes.lock().unwrap().clone()
    }
}

fn to_rows(values: Vec<serde_json::Value>) -> Vec<Row> {
    values
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}

fn row_stream(rows: Vec<Row>) -> RowStream<'static> {
    Box::pin(stream::iter(rows.into_iter().map(Ok)))
}

#[async_trait]
impl QueryClient for FakeQuery {
    async fn describe(&self, entity: &str) -> Result<Vec<FieldDescriptor>> {
        self.describes.lock().unwrap().push(entity.to_string());
        Ok(self.descriptors.get(entity).cloned().unwrap_or_default())
    }

    async fn query(&self, soql: &str) -> Result<RowStream<'_>> {
        self.queries.lock().unwrap().push(soql.to_string());
        let entity = entity_of(soql);
        if self.failing.contains(&entity) {
            return Err(Error::http_status(500, "INVALID_SESSION_ID"));
        }
        if self.failing_full_scans && !soql.contains(" WHERE ") {
            return Err(Error::http_status(400, "QUERY_TOO_COMPLICATED"));
        }
        Ok(row_stream(self.rows.get(&entity).cloned().unwrap_or_default()))
    }

    async fn query_all(&self, soql: &str) -> Result<RowStream<'_>> {
        self.query_alls.lock().unwrap().push(soql.to_string());
        let entity = entity_of(soql);
        if self.failing_query_all.contains(&entity) {
            return Err(Error::http_status(503, "unavailable"));
        }
        Ok(row_stream(
            self.deleted_rows.get(&entity).cloned().unwrap_or_default(),
        ))
    }

    fn server(&self) -> String {
        "https://fake.my.salesforce.com".to_string()
    }
}

#[derive(Clone)]
enum BulkBehavior {
    /// Write one partial file per page
    Pages(Vec<String>),
    Fail,
    /// Block until cancelled
    Hang,
}

struct FakeBulk {
    default: BulkBehavior,
    per_entity: HashMap<String, BulkBehavior>,
    per_stem: HashMap<String, BulkBehavior>,
    requests: Mutex<Vec<BulkQueryRequest>>,
}

impl FakeBulk {
    fn new(default: BulkBehavior) -> Self {
        Self {
            default,
            per_entity: HashMap::new(),
            per_stem: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_entity(mut self, entity: &str, behavior: BulkBehavior) -> Self {
        self.per_entity.insert(entity.to_string(), behavior);
        self
    }

    /// Override the behavior for one output file stem
    fn with_stem(mut self, stem: &str, behavior: BulkBehavior) -> Self {
        self.per_stem.insert(stem.to_string(), behavior);
        self
    }

    fn requests(&self) -> Vec<BulkQueryRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BulkClient for FakeBulk {
    async fn submit_query(
        &self,
        request: &BulkQueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        self.requests.lock().unwrap().push(request.clone());
        let behavior = self
            .per_stem
            .get(&request.file_stem)
            .or_else(|| self.per_entity.get(&request.entity))
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match behavior {
            BulkBehavior::Pages(pages) => {
                let mut files = Vec::new();
                for (i, page) in pages.iter().enumerate() {
                    let path = request.partial_path(i + 1);
                    std::fs::write(&path, page).unwrap();
                    files.push(path);
                }
                Ok(files)
            }
            BulkBehavior::Fail => {
                std::fs::write(request.partial_path(1), "\"Id\"\n\"half\"\n").unwrap();
                Err(Error::bulk_job("job 750X Failed: QUERY_TIMEOUT"))
            }
            BulkBehavior::Hang => {
                cancel.cancelled().await;
                Err(Error::cancelled("bulk job abandoned"))
            }
        }
    }
}

struct FailingBackup {
    calls: Mutex<usize>,
}

#[async_trait]
impl BackupSink for FailingBackup {
    async fn archive(&self, _entity: &str, _file: &Path) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        Err(Error::output("bucket unreachable"))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn account() -> Entity {
    Entity::new("Account")
        .with_field(Field::new("Id"))
        .with_field(Field::new("Name"))
        .with_field(Field::new("CreatedDate"))
}

fn cycle_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

const ACCOUNT_PAGE: &str = "\"Id\",\"Name\",\"CreatedDate\"\n\
\"001A\",\"Acme\",\"2020-01-01T00:00:00.000Z\"\n\
\"001B\",\"Globex\",\"2021-01-01T00:00:00.000Z\"\n\
\"001C\",\"Initech\",\"2022-01-01T00:00:00.000Z\"\n";

fn account_pages() -> BulkBehavior {
    BulkBehavior::Pages(vec![
        ACCOUNT_PAGE.to_string(),
        EMPTY_RESULT_SENTINEL.to_string(),
    ])
}

struct Harness {
    dir: TempDir,
    query: Arc<FakeQuery>,
    bulk: Arc<FakeBulk>,
    catalog: Arc<FileCatalog>,
    extractor: Extractor,
}

fn harness(
    query: FakeQuery,
    bulk: FakeBulk,
    checkpoints: CheckpointStore,
    entities: Vec<Entity>,
) -> Harness {
    harness_with(query, bulk, checkpoints, entities, |c| c)
}

fn harness_with(
    query: FakeQuery,
    bulk: FakeBulk,
    checkpoints: CheckpointStore,
    entities: Vec<Entity>,
    configure: impl FnOnce(ExtractConfig) -> ExtractConfig,
) -> Harness {
    let dir = tempdir().unwrap();
    let query = Arc::new(query);
    let bulk = Arc::new(bulk);
    let catalog = Arc::new(FileCatalog::in_memory(entities));
    let config = configure(ExtractConfig::new(dir.path().join("out")));
    let extractor = Extractor::new(
        query.clone(),
        bulk.clone(),
        checkpoints,
        catalog.clone(),
        config,
    );
    Harness {
        dir,
        query,
        bulk,
        catalog,
        extractor,
    }
}

fn checkpoint_at(entity: &str, timestamp: &str) -> CheckpointStore {
    CheckpointStore::from_json(&format!(
        r#"{{"entities": {{"{entity}": {{"lastLoadTimestamp": "{timestamp}"}}}}}}"#
    ))
    .unwrap()
}

fn read_records(path: &Path) -> Vec<Vec<String>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .unwrap()
        .records()
        .map(|r| r.unwrap().iter().map(ToString::to_string).collect())
        .collect()
}

// ============================================================================
// Cycle Context
// ============================================================================

#[test]
fn test_context_truncates_to_seconds() {
    let now = cycle_now() + chrono::Duration::milliseconds(731);
    assert_eq!(CycleContext::new(now).now(), cycle_now());
}

#[tokio::test]
async fn test_context_check_and_guard() {
    let ctx = CycleContext::new(cycle_now());
    ctx.check().unwrap();
    assert_eq!(ctx.guard(async { Ok(7) }).await.unwrap(), 7);

    ctx.cancel();
    assert!(ctx.check().unwrap_err().is_cancelled());
    let err = ctx
        .guard(std::future::pending::<Result<()>>())
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_context_deadline() {
    let ctx = CycleContext::new(cycle_now()).with_deadline(Duration::from_millis(20));
    let err = ctx
        .guard(std::future::pending::<Result<()>>())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deadline"));
    assert!(ctx.check().is_err());
}

#[test]
fn test_stage_order() {
    let mut stages = vec![Stage::Clean];
    while let Some(next) = stages.last().and_then(|s| s.next()) {
        stages.push(next);
    }
    assert_eq!(
        stages,
        vec![
            Stage::Clean,
            Stage::DataDownload,
            Stage::DeletedDownload,
            Stage::ResyncDownload,
            Stage::Checkpointed,
        ]
    );
    assert_eq!(Stage::DeletedDownload.output_kind(), Some(OutputKind::Deleted));
    assert_eq!(Stage::Clean.output_kind(), None);
}

// ============================================================================
// Per-Entity Lifecycle
// ============================================================================

#[tokio::test]
async fn test_account_first_cycle() {
    let h = harness(
        FakeQuery::default().with_deleted(
            "Account",
            vec![json!({"Id": "001Z", "CreatedDate": "2023-05-01T00:00:00.000Z", "IsDeleted": true})],
        ),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = account();

    let stats = h.extractor.download_entity(&mut entity, &ctx).await.unwrap();

    // Bulk: header + 3 rows, sentinel dropped
    let data_file = entity.runtime_outputs.data_file.clone().unwrap();
    let records = read_records(&data_file);
    assert_eq!(records.len(), 4);
    assert_eq!(records[0], vec!["Id", "Name", "CreatedDate"]);
    assert_eq!(stats.data_rows, 3);
    assert_eq!(stats.data_path, Some(DownloadPath::Bulk));

    let requests = h.bulk.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].soql,
        "SELECT Id, Name, CreatedDate FROM Account WHERE CreatedDate >= 1999-01-01T00:00:00Z AND CreatedDate < 2024-06-01T12:00:00Z"
    );

    // Deleted records through queryAll only
    assert_eq!(
        h.query.query_alls(),
        vec![
            "SELECT Id, CreatedDate, IsDeleted FROM Account WHERE CreatedDate >= 1999-01-01T00:00:00Z AND CreatedDate < 2024-06-01T12:00:00Z AND IsDeleted = true"
        ]
    );
    assert!(h.query.queries().is_empty());
    let deleted_file = entity.runtime_outputs.deleted_file.clone().unwrap();
    assert!(deleted_file.ends_with("Account_deleted.csv"));
    assert_eq!(stats.deleted_rows, 1);

    // No resync on a first cycle
    assert!(entity.runtime_outputs.resync_file.is_none());

    assert_eq!(
        h.extractor.checkpoints().last_load("Account").await,
        Some(cycle_now())
    );
    assert!(entity.fields.iter().all(|f| f.synchronized));

    // No partial files left behind
    let leftovers: Vec<_> = std::fs::read_dir(h.extractor.config().output_dir.clone())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.contains(".part"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_bulk_failure_falls_back_with_same_query() {
    let h = harness(
        FakeQuery::default().with_rows(
            "Account",
            vec![
                json!({"Id": "001A", "Name": "Acme", "CreatedDate": "2020-01-01T00:00:00.000Z"}),
                json!({"Id": "001B", "Name": [{"xsi:nil": "true"}], "CreatedDate": "2021-01-01T00:00:00.000Z"}),
            ],
        ),
        FakeBulk::new(BulkBehavior::Fail),
        CheckpointStore::in_memory(),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = account();

    let stats = h.extractor.download_entity(&mut entity, &ctx).await.unwrap();

    let bulk_soql = h.bulk.requests()[0].soql.clone();
    assert_eq!(h.query.queries(), vec![bulk_soql]);
    assert_eq!(stats.data_path, Some(DownloadPath::Synchronous));
    assert_eq!(stats.data_rows, 2);

    let records = read_records(entity.runtime_outputs.data_file.as_ref().unwrap());
    assert_eq!(records[2], vec!["001B", "", "2021-01-01T00:00:00.000Z"]);
    assert_eq!(
        h.extractor.checkpoints().last_load("Account").await,
        Some(cycle_now())
    );
}

#[tokio::test]
async fn test_zero_enabled_fields_fails_before_network() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = Entity::new("Account").with_field(Field::new("Id").enabled(false));

    let err = h
        .extractor
        .download_entity(&mut entity, &ctx)
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert!(h.bulk.requests().is_empty());
    assert!(h.query.queries().is_empty());
    assert!(h.query.query_alls().is_empty());
    assert!(h.extractor.checkpoints().last_load("Account").await.is_none());
}

#[tokio::test]
async fn test_unavailable_field_limit_is_configuration_error() {
    let h = harness_with(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
        |c| c.with_field_limit("Account", ["Id", "Revenue__c"]),
    );
    let ctx = CycleContext::new(cycle_now());

    let err = h
        .extractor
        .download_entity(&mut account(), &ctx)
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert!(err.to_string().contains("Revenue__c"));
    assert!(h.bulk.requests().is_empty());
}

#[tokio::test]
async fn test_window_starts_at_previous_checkpoint() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        checkpoint_at("Account", "2024-05-01T00:00:00Z"),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = account();
    for field in &mut entity.fields {
        field.synchronized = true;
    }
    let before = h.extractor.checkpoints().last_load("Account").await.unwrap();

    h.extractor.download_entity(&mut entity, &ctx).await.unwrap();

    let requests = h.bulk.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].window.from, before);
    assert_eq!(requests[0].window.to, ctx.now());
    let after = h.extractor.checkpoints().last_load("Account").await.unwrap();
    assert!(after >= before);
    assert_eq!(after, ctx.now());
}

#[tokio::test]
async fn test_resync_backfills_unsynchronized_fields() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        checkpoint_at("Account", "2024-05-01T00:00:00Z"),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = Entity::new("Account")
        .with_field(Field::new("Id").synchronized(true))
        .with_field(Field::new("Name").synchronized(true))
        .with_field(Field::new("CreatedDate").synchronized(true))
        .with_field(Field::new("Industry"));

    let stats = h.extractor.download_entity(&mut entity, &ctx).await.unwrap();

    let requests = h.bulk.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].soql, "SELECT Id, Industry FROM Account");
    assert_eq!(requests[1].file_stem, "Account_synchronization");
    assert_eq!(stats.resynced_fields, vec!["Industry"]);
    assert_eq!(stats.resync_path, Some(DownloadPath::Bulk));
    assert!(entity
        .runtime_outputs
        .resync_file
        .as_ref()
        .unwrap()
        .ends_with("Account_synchronization.csv"));
    assert!(entity.field("Industry").unwrap().synchronized);
}

fn account_with_new_field() -> Entity {
    Entity::new("Account")
        .with_field(Field::new("Id").synchronized(true))
        .with_field(Field::new("Name").synchronized(true))
        .with_field(Field::new("CreatedDate").synchronized(true))
        .with_field(Field::new("Industry"))
}

#[tokio::test]
async fn test_resync_falls_back_to_synchronous_query() {
    let h = harness(
        FakeQuery::default().with_rows(
            "Account",
            vec![json!({"Id": "001A", "Industry": "Energy"})],
        ),
        FakeBulk::new(account_pages()).with_stem("Account_synchronization", BulkBehavior::Fail),
        checkpoint_at("Account", "2024-05-01T00:00:00Z"),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = account_with_new_field();

    let stats = h.extractor.download_entity(&mut entity, &ctx).await.unwrap();

    assert_eq!(h.query.queries(), vec!["SELECT Id, Industry FROM Account"]);
    assert_eq!(stats.data_path, Some(DownloadPath::Bulk));
    assert_eq!(stats.resync_path, Some(DownloadPath::Synchronous));
    assert_eq!(stats.resync_rows, 1);
    let records = read_records(entity.runtime_outputs.resync_file.as_ref().unwrap());
    assert_eq!(records, vec![vec!["Id", "Industry"], vec!["001A", "Energy"]]);
    assert!(entity.field("Industry").unwrap().synchronized);
    assert_eq!(
        h.extractor.checkpoints().last_load("Account").await,
        Some(cycle_now())
    );
}

#[tokio::test]
async fn test_resync_failure_keeps_checkpoint_and_flags() {
    let h = harness(
        FakeQuery::default().failing_full_scans(),
        FakeBulk::new(account_pages()).with_stem("Account_synchronization", BulkBehavior::Fail),
        checkpoint_at("Account", "2024-05-01T00:00:00Z"),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = account_with_new_field();

    let err = h
        .extractor
        .download_entity(&mut entity, &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Download { .. }));
    assert!(err.to_string().contains("resync download"));
    assert!(err.to_string().contains("QUERY_TOO_COMPLICATED"));
    assert!(!entity.field("Industry").unwrap().synchronized);
    assert_eq!(
        h.extractor.checkpoints().last_load("Account").await,
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_stale_cycle_reports_stored_checkpoint() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        checkpoint_at("Account", "2024-07-01T00:00:00Z"),
        vec![account()],
    );
    let ctx = CycleContext::new(cycle_now());

    let report = h.extractor.run_cycle(&ctx).await.unwrap();

    let stored = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
    match &report.entities["Account"] {
        EntityOutcome::Advanced { checkpoint, stats } => {
            assert_eq!(*checkpoint, stored);
            assert_eq!(stats.checkpoint, Some(stored));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.extractor.checkpoints().last_load("Account").await, Some(stored));
}

#[tokio::test]
async fn test_both_paths_failing_keeps_checkpoint() {
    let h = harness(
        FakeQuery::default().failing("Account"),
        FakeBulk::new(BulkBehavior::Fail),
        checkpoint_at("Account", "2024-05-01T00:00:00Z"),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = account();

    let err = h
        .extractor
        .download_entity(&mut entity, &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Download { .. }));
    assert!(err.to_string().contains("QUERY_TIMEOUT"));
    assert!(err.to_string().contains("INVALID_SESSION_ID"));
    assert!(!err.is_configuration());
    assert!(h.query.query_alls().is_empty());
    assert_eq!(
        h.extractor.checkpoints().last_load("Account").await,
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_deleted_failure_keeps_checkpoint() {
    let h = harness(
        FakeQuery::default().failing_query_all("Account"),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());

    let err = h
        .extractor
        .download_entity(&mut account(), &ctx)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("deleted download"));
    assert!(h.extractor.checkpoints().last_load("Account").await.is_none());
}

#[tokio::test]
async fn test_cancelled_bulk_does_not_fall_back() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(BulkBehavior::Hang),
        CheckpointStore::in_memory(),
        vec![],
    );
    let ctx = CycleContext::new(cycle_now());
    let trigger = ctx.cancel_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = h
        .extractor
        .download_entity(&mut account(), &ctx)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(h.query.queries().is_empty());
    assert!(h.extractor.checkpoints().last_load("Account").await.is_none());
}

#[tokio::test]
async fn test_clean_removes_previous_outputs() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
    );
    let out = h.extractor.config().output_dir.clone();
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("Account_synchronization.csv"), "stale").unwrap();
    std::fs::write(out.join("Account.part0009.csv"), "stale").unwrap();
    std::fs::write(out.join("AccountHistory.csv"), "sibling").unwrap();

    let ctx = CycleContext::new(cycle_now());
    let mut entity = account();
    entity
        .runtime_outputs
        .set(OutputKind::Resync, out.join("Account_synchronization.csv"));

    h.extractor.download_entity(&mut entity, &ctx).await.unwrap();

    assert!(!out.join("Account_synchronization.csv").exists());
    assert!(!out.join("Account.part0009.csv").exists());
    assert!(out.join("AccountHistory.csv").exists());
    assert!(entity.runtime_outputs.resync_file.is_none());
}

#[tokio::test]
async fn test_filename_prefix_applies_to_outputs() {
    let h = harness_with(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
        |c| c.with_filename_prefix("dss"),
    );
    let ctx = CycleContext::new(cycle_now());
    let mut entity = account();

    h.extractor.download_entity(&mut entity, &ctx).await.unwrap();

    assert_eq!(h.bulk.requests()[0].file_stem, "dss_Account");
    assert!(entity
        .runtime_outputs
        .data_file
        .as_ref()
        .unwrap()
        .ends_with("dss_Account.csv"));
    assert!(entity
        .runtime_outputs
        .deleted_file
        .as_ref()
        .unwrap()
        .ends_with("dss_Account_deleted.csv"));
}

#[tokio::test]
async fn test_backup_failure_does_not_roll_back() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
    );
    let backup = Arc::new(FailingBackup {
        calls: Mutex::new(0),
    });
    let extractor = h.extractor.with_backup(backup.clone());
    let ctx = CycleContext::new(cycle_now());

    extractor
        .download_entity(&mut account(), &ctx)
        .await
        .unwrap();

    assert_eq!(*backup.calls.lock().unwrap(), 2);
    assert_eq!(
        extractor.checkpoints().last_load("Account").await,
        Some(cycle_now())
    );
}

// ============================================================================
// Field Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_fields_appends_new_fields() {
    let h = harness_with(
        FakeQuery::default().with_descriptors(
            "Account",
            vec![
                FieldDescriptor::new("Id", "id").with_label("Account ID"),
                FieldDescriptor::new("Industry", "picklist").with_length(40),
            ],
        ),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
        |c| c.with_refresh_fields(true, true),
    );
    let mut entity = account();

    let changes = h.extractor.refresh_fields(&mut entity).await.unwrap();

    assert_eq!(changes.added, vec!["Industry"]);
    assert_eq!(changes.updated, vec!["Id"]);
    let industry = entity.field("Industry").unwrap();
    assert!(industry.enabled);
    assert!(!industry.synchronized);
}

#[tokio::test]
async fn test_refresh_skips_disabled_entity() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![],
    );
    let mut entity = account().enabled(false);

    let changes = h.extractor.refresh_fields(&mut entity).await.unwrap();

    assert_eq!(changes, FieldChanges::default());
    assert!(h.query.describes().is_empty());
}

// ============================================================================
// Cycle Driver
// ============================================================================

#[tokio::test]
async fn test_cycle_reports_partial_success() {
    let contact = Entity::new("Contact")
        .with_field(Field::new("Id"))
        .with_field(Field::new("LastName"));
    let lead = Entity::new("Lead").with_field(Field::new("Id")).enabled(false);

    let h = harness_with(
        FakeQuery::default().failing("Contact"),
        FakeBulk::new(account_pages()).with_entity("Contact", BulkBehavior::Fail),
        CheckpointStore::in_memory(),
        vec![account(), contact, lead],
        |c| c.with_refresh_fields(true, false).with_concurrency(2),
    );
    let ctx = CycleContext::new(cycle_now());

    let report = h.extractor.run_cycle(&ctx).await.unwrap();

    assert_eq!(report.advanced(), vec!["Account"]);
    let failed = report.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "Contact");
    assert_eq!(report.skipped, vec!["Lead"]);
    assert!(!report.is_complete_success());
    assert_eq!(report.stats("Account").unwrap().data_rows, 3);

    // Disabled entities are never described
    let mut described = h.query.describes();
    described.sort();
    assert_eq!(described, vec!["Account", "Contact"]);

    assert_eq!(
        h.extractor.checkpoints().last_load("Account").await,
        Some(cycle_now())
    );
    assert!(h.extractor.checkpoints().last_load("Contact").await.is_none());

    // Synchronized flags persisted for the advanced entity only
    let saved = h.catalog.entities().await.unwrap();
    let saved_account = saved.iter().find(|e| e.id == "Account").unwrap();
    assert!(saved_account.fields.iter().all(|f| f.synchronized));
    let saved_contact = saved.iter().find(|e| e.id == "Contact").unwrap();
    assert!(saved_contact.fields.iter().all(|f| !f.synchronized));
}

#[tokio::test]
async fn test_cycle_writes_manifest() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![account()],
    );
    let ctx = CycleContext::new(cycle_now());

    let report = h.extractor.run_cycle(&ctx).await.unwrap();

    let path = report.manifest_path.unwrap();
    assert!(path.starts_with(h.dir.path()));
    let manifest: ExtractionManifest =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(manifest.meta.server, "https://fake.my.salesforce.com");
    assert_eq!(manifest.meta.generated_at, Some(cycle_now()));
    let object = &manifest.objects["Account"];
    assert_eq!(object.fields, vec!["Id", "Name", "CreatedDate"]);
    assert_eq!(object.files.len(), 2);
    assert!(object.files.iter().all(|f| f.is_absolute()));
}

#[tokio::test]
async fn test_second_cycle_is_incremental() {
    let h = harness(
        FakeQuery::default(),
        FakeBulk::new(account_pages()),
        CheckpointStore::in_memory(),
        vec![account()],
    );

    let first = CycleContext::new(cycle_now());
    h.extractor.run_cycle(&first).await.unwrap();
    let second = CycleContext::new(cycle_now() + chrono::Duration::hours(1));
    h.extractor.run_cycle(&second).await.unwrap();

    let requests = h.bulk.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].window.from, cycle_now());
    assert_eq!(requests[1].window.to, second.now());
    assert_eq!(
        h.extractor.checkpoints().last_load("Account").await,
        Some(second.now())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_cycle_persists_every_checkpoint() {
    let state_dir = tempdir().unwrap();
    let state_path = state_dir.path().join("state.json");
    let entities: Vec<Entity> = (0..16)
        .map(|i| Entity::new(format!("E{i}")).with_field(Field::new("Id")))
        .collect();
    let h = harness_with(
        FakeQuery::default(),
        FakeBulk::new(BulkBehavior::Pages(vec!["\"Id\"\n\"001\"\n".to_string()])),
        CheckpointStore::new(&state_path),
        entities,
        |c| c.with_concurrency(4),
    );
    let ctx = CycleContext::new(cycle_now());

    let report = h.extractor.run_cycle(&ctx).await.unwrap();

    assert!(report.is_complete_success(), "failed: {:?}", report.failed());
    assert_eq!(report.advanced().len(), 16);

    let restarted = CheckpointStore::from_file(&state_path).unwrap();
    for i in 0..16 {
        assert_eq!(
            restarted.last_load(&format!("E{i}")).await,
            Some(cycle_now())
        );
    }
    let saved = h.catalog.entities().await.unwrap();
    assert!(saved.iter().all(|e| e.fields.iter().all(|f| f.synchronized)));
}
