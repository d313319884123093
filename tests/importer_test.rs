//! FolderImporter against the in-memory store.
//!
//! Covers the outcome table end to end: idempotent re-runs, creation,
//! overwrite of changed or hash-less objects, dry runs, failure isolation,
//! cancellation and timeouts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sheetsync::errors::{FailureKind, SyncError};
use sheetsync::models::object::{ObjectDescriptor, RemoteObject};
use sheetsync::models::outcome::{Outcome, RunSummary};
use sheetsync::services::importer::{FailurePolicy, FolderImporter, ImportOptions};
use sheetsync::store::{BackendResult, MemoryStore, ObjectStore, PutObject};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const HASH_A: &str = "7fc56270e7a70fa81a5935b72eacbe29";
const HASH_B: &str = "9d5ed678fe57bcca610140957afab571";

fn write(base: &Path, rel: &str, content: &[u8]) {
    let path = base.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn importer(store: &Arc<MemoryStore>, options: ImportOptions) -> FolderImporter {
    FolderImporter::new(store.clone(), options)
}

async fn run(importer: &FolderImporter, base: &Path) -> RunSummary {
    importer
        .run(&[base.to_path_buf()], CancellationToken::new(), |_| {})
        .await
        .unwrap()
}

fn descriptor(key: &str, meta: &[(&str, &str)]) -> ObjectDescriptor {
    ObjectDescriptor {
        key: key.into(),
        content_type: Some("application/vnd.ms-excel".into()),
        size_bytes: 1,
        etag: None,
        metadata: meta.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
}

fn outcome(summary: &RunSummary, key: &str) -> Outcome {
    summary.by_key(key).unwrap_or_else(|| panic!("no report for {key}")).outcome.clone()
}

#[tokio::test]
async fn skip_existing_and_create_missing_with_one_transfer() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");
    write(dir.path(), "b.xlsx", b"B");

    let store = Arc::new(MemoryStore::new());
    store.seed(descriptor("a.xls", &[("content-md5", HASH_A)]), Bytes::from_static(b"A"));

    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;

    assert_eq!(summary.reports.len(), 2);
    assert_eq!(outcome(&summary, "a.xls"), Outcome::Skipped);
    assert_eq!(outcome(&summary, "b.xlsx"), Outcome::Created);
    assert_eq!(store.put_keys(), vec!["b.xlsx".to_string()]);
    assert!(summary.is_success());
}

#[tokio::test]
async fn second_run_over_unchanged_tree_skips_everything() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");
    write(dir.path(), "2020/run-1/b.xlsm", b"B");

    let store = Arc::new(MemoryStore::new());
    let importer = importer(&store, ImportOptions::default());

    let first = run(&importer, dir.path()).await;
    assert_eq!(first.created(), 2);

    let second = run(&importer, dir.path()).await;
    assert_eq!(second.skipped(), 2);
    assert_eq!(store.put_calls(), 2);
}

#[tokio::test]
async fn created_object_carries_local_hash_and_content_type() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "sub/b.xlsx", b"B");

    let store = Arc::new(MemoryStore::new());
    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;

    let report = summary.by_key("sub/b.xlsx").unwrap();
    assert_eq!(report.hash.unwrap().to_hex(), HASH_B);

    let stored = store.object("sub/b.xlsx").unwrap();
    assert_eq!(stored.content_hash(), Some(HASH_B));
    assert_eq!(
        stored.content_type.as_deref(),
        Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
    );
    assert_eq!(store.body("sub/b.xlsx").unwrap(), Bytes::from_static(b"B"));
}

#[tokio::test]
async fn changed_content_overwrites_and_updates_hash() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"B");

    let store = Arc::new(MemoryStore::new());
    store.seed(descriptor("a.xls", &[("content-md5", HASH_A)]), Bytes::from_static(b"A"));

    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;

    assert_eq!(outcome(&summary, "a.xls"), Outcome::Overwritten);
    assert_eq!(store.object("a.xls").unwrap().content_hash(), Some(HASH_B));
    assert_eq!(store.body("a.xls").unwrap(), Bytes::from_static(b"B"));
}

#[tokio::test]
async fn object_without_hash_metadata_is_overwritten() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");

    let store = Arc::new(MemoryStore::new());
    store.seed(descriptor("a.xls", &[]), Bytes::from_static(b"A"));

    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;

    assert_eq!(outcome(&summary, "a.xls"), Outcome::Overwritten);
    assert_eq!(store.put_calls(), 1);
}

#[tokio::test]
async fn foreign_metadata_casing_is_recognized() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");

    let store = Arc::new(MemoryStore::new());
    store.seed(
        descriptor("a.xls", &[("Content-MD5", &HASH_A.to_uppercase())]),
        Bytes::from_static(b"A"),
    );

    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;
    assert_eq!(outcome(&summary, "a.xls"), Outcome::Skipped);
    assert_eq!(store.put_calls(), 0);
}

#[tokio::test]
async fn dry_run_reports_intent_without_writing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");
    write(dir.path(), "b.xlsx", b"B");

    let store = Arc::new(MemoryStore::new());
    store.seed(descriptor("a.xls", &[("content-md5", HASH_B)]), Bytes::from_static(b"B"));
    let options = ImportOptions {
        dry_run: true,
        ..ImportOptions::default()
    };

    let summary = run(&importer(&store, options), dir.path()).await;

    assert_eq!(outcome(&summary, "b.xlsx"), Outcome::Created);
    assert_eq!(outcome(&summary, "a.xls"), Outcome::Overwritten);
    assert!(summary.reports.iter().all(|r| r.dry_run));
    assert_eq!(store.put_calls(), 0);
    assert!(store.object("b.xlsx").is_none());
    assert_eq!(store.object("a.xls").unwrap().content_hash(), Some(HASH_B));
    assert_eq!(store.head_calls(), 2);
}

#[tokio::test]
async fn non_matching_files_are_ignored() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");
    write(dir.path(), "readme.txt", b"-");
    write(dir.path(), "b.XLSX", b"-");
    fs::create_dir_all(dir.path().join("folder.xlsx")).unwrap();

    let store = Arc::new(MemoryStore::new());
    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;

    assert_eq!(summary.reports.len(), 1);
    assert_eq!(store.head_calls(), 1);
}

#[tokio::test]
async fn backend_failure_is_recorded_and_batch_continues() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");
    write(dir.path(), "b.xls", b"B");

    let store = Arc::new(MemoryStore::new());
    store.fail_key("a.xls");

    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;

    assert!(matches!(
        outcome(&summary, "a.xls"),
        Outcome::Failed { kind: FailureKind::Backend, .. }
    ));
    assert_eq!(outcome(&summary, "b.xls"), Outcome::Created);
    assert!(!summary.halted);
    assert!(!summary.is_success());
}

#[tokio::test]
async fn abort_policy_halts_after_first_backend_failure() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    for i in 0..5 {
        let name = format!("f{i}.xls");
        write(dir.path(), &name, name.as_bytes());
        store.fail_key(name);
    }
    let options = ImportOptions {
        concurrency: 1,
        failure_policy: FailurePolicy::Abort,
        ..ImportOptions::default()
    };

    let summary = run(&importer(&store, options), dir.path()).await;

    assert!(summary.halted);
    assert!(!summary.cancelled);
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(store.head_calls(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_file_fails_alone() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    write(dir.path(), "locked.xls", b"L");
    write(dir.path(), "ok.xls", b"A");
    let locked = dir.path().join("locked.xls");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    // root ignores file modes
    if fs::read(&locked).is_ok() {
        return;
    }

    let store = Arc::new(MemoryStore::new());
    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;

    assert!(matches!(
        outcome(&summary, "locked.xls"),
        Outcome::Failed { kind: FailureKind::Io, .. }
    ));
    assert_eq!(outcome(&summary, "ok.xls"), Outcome::Created);
    assert_eq!(store.put_keys(), vec!["ok.xls".to_string()]);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_directory_is_reported_without_a_key() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    write(dir.path(), "sealed/inner.xls", b"S");
    write(dir.path(), "ok.xls", b"A");
    let sealed = dir.path().join("sealed");
    fs::set_permissions(&sealed, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&sealed).is_ok() {
        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let store = Arc::new(MemoryStore::new());
    let summary = run(&importer(&store, ImportOptions::default()), dir.path()).await;
    fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).unwrap();

    let walk_failure = summary
        .reports
        .iter()
        .find(|r| r.key.is_none())
        .expect("walk error should be reported");
    assert_eq!(walk_failure.path, sealed);
    assert!(matches!(
        walk_failure.outcome,
        Outcome::Failed { kind: FailureKind::Io, .. }
    ));
    assert!(walk_failure.hash.is_none());
    assert_eq!(outcome(&summary, "ok.xls"), Outcome::Created);
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(store.put_keys(), vec!["ok.xls".to_string()]);
}

/// Rewrites one local file during its lookup, after the importer hashed it.
struct RewritingStore {
    inner: MemoryStore,
    key: &'static str,
    path: PathBuf,
}

#[async_trait]
impl ObjectStore for RewritingStore {
    async fn head_object(&self, key: &str) -> BackendResult<RemoteObject> {
        if key == self.key {
            fs::write(&self.path, b"rewritten meanwhile").unwrap();
        }
        self.inner.head_object(key).await
    }

    async fn put_object(&self, req: PutObject) -> BackendResult<ObjectDescriptor> {
        self.inner.put_object(req).await
    }
}

#[tokio::test]
async fn file_changed_during_upload_is_a_local_failure() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");
    write(dir.path(), "b.xls", b"B");

    let store = Arc::new(RewritingStore {
        inner: MemoryStore::new(),
        key: "a.xls",
        path: dir.path().join("a.xls"),
    });
    let options = ImportOptions {
        concurrency: 1,
        failure_policy: FailurePolicy::Abort,
        ..ImportOptions::default()
    };
    let summary = FolderImporter::new(store.clone(), options)
        .run(&[dir.path().to_path_buf()], CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert!(matches!(
        outcome(&summary, "a.xls"),
        Outcome::Failed { kind: FailureKind::Io, .. }
    ));
    assert_eq!(outcome(&summary, "b.xls"), Outcome::Created);
    assert!(!summary.halted);
    assert!(store.inner.object("a.xls").is_none());
}

#[tokio::test]
async fn stuck_backend_times_out_per_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");

    let store = Arc::new(MemoryStore::with_latency(Duration::from_secs(5)));
    let options = ImportOptions {
        file_timeout: Duration::from_millis(50),
        ..ImportOptions::default()
    };

    let summary = run(&importer(&store, options), dir.path()).await;
    assert!(matches!(
        outcome(&summary, "a.xls"),
        Outcome::Failed { kind: FailureKind::Timeout, .. }
    ));
}

#[tokio::test]
async fn cancelled_token_schedules_nothing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");

    let store = Arc::new(MemoryStore::new());
    let token = CancellationToken::new();
    token.cancel();

    let summary = importer(&store, ImportOptions::default())
        .run(&[dir.path().to_path_buf()], token, |_| {})
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert!(summary.reports.is_empty());
    assert_eq!(store.head_calls(), 0);
}

#[tokio::test]
async fn cancelling_mid_run_lets_in_flight_files_finish() {
    let dir = TempDir::new().unwrap();
    for i in 0..10 {
        write(dir.path(), &format!("f{i}.xls"), format!("row {i}").as_bytes());
    }
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(20)));
    let options = ImportOptions {
        concurrency: 2,
        ..ImportOptions::default()
    };

    let token = CancellationToken::new();
    let canceller = token.clone();
    let summary = importer(&store, options)
        .run(&[dir.path().to_path_buf()], token, move |_| canceller.cancel())
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert!(!summary.reports.is_empty());
    assert!(summary.reports.len() <= 2, "scheduled after cancel: {}", summary.reports.len());
    assert_eq!(summary.created(), summary.reports.len());
    assert_eq!(store.put_calls(), summary.reports.len());
}

#[tokio::test]
async fn invalid_base_aborts_before_processing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xls", b"A");
    let missing: PathBuf = dir.path().join("missing");

    let store = Arc::new(MemoryStore::new());
    let err = importer(&store, ImportOptions::default())
        .run(&[dir.path().to_path_buf(), missing], CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidInput { .. }));
    assert_eq!(store.head_calls(), 0);
}

#[tokio::test]
async fn every_file_reported_once_through_callback() {
    let dir = TempDir::new().unwrap();
    for i in 0..20 {
        write(dir.path(), &format!("batch/{i:02}.xlsx"), format!("row {i}").as_bytes());
    }
    let store = Arc::new(MemoryStore::new());
    let options = ImportOptions {
        concurrency: 8,
        ..ImportOptions::default()
    };

    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let summary = importer(&store, options)
        .run(&[dir.path().to_path_buf()], CancellationToken::new(), |report| {
            *seen.entry(report.key.clone().unwrap()).or_default() += 1;
        })
        .await
        .unwrap();

    assert_eq!(summary.created(), 20);
    assert_eq!(seen.len(), 20);
    assert!(seen.values().all(|&n| n == 1));
}

#[tokio::test]
async fn key_prefix_is_applied() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "x/a.xls", b"A");

    let store = Arc::new(MemoryStore::new());
    let options = ImportOptions {
        key_prefix: Some("laserchron".into()),
        ..ImportOptions::default()
    };
    run(&importer(&store, options), dir.path()).await;

    assert!(store.object("laserchron/x/a.xls").is_some());
}
