#![allow(missing_docs)]

use std::fs;
use std::sync::{Arc, Once};

use extentdb::admin::{stats, verify, VerifyLevel};
use extentdb::storage::{CounterMetrics, Document, StorageManager, StoreOptions};
use extentdb::types::{OpContext, Result, StoreError};
use serde_json::{json, Value};
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

const NS: &str = "grow.rows";
const KIB: u32 = 1024;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("extentdb=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn doc(value: Value) -> Document {
    Document::try_from(value).expect("object")
}

fn row(n: usize) -> Document {
    doc(json!({ "n": n, "body": "r".repeat(180) }))
}

fn small_files() -> StoreOptions {
    StoreOptions::in_memory().file_sizes(64 * KIB, 256 * KIB)
}

#[test]
fn collection_spills_into_doubling_files() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let store = StorageManager::open(small_files().metrics(metrics.clone()))?;
    let ctx = OpContext::user();
    for n in 0..2000 {
        store.insert(&ctx, NS, &row(n))?;
    }

    let files = store.file_count("grow");
    assert!(files >= 3, "only {files} files");
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.files_allocated, files as u64);
    assert!(snapshot.extents_allocated > 2);

    let report = stats(&store).expect("stats");
    let db = &report.databases[0];
    let expected: u64 = (0..files as u32)
        .map(|n| ((64 * KIB) << n.min(5)).min(256 * KIB) as u64)
        .sum();
    assert_eq!(db.file_bytes, expected);

    let count = store.scan(NS, None)?.count();
    assert_eq!(count, 2000);
    let verified = verify(&store, VerifyLevel::Full).expect("verify");
    assert!(verified.success, "{:?}", verified.findings);
    Ok(())
}

#[test]
fn on_disk_files_are_named_and_sized_by_number() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let store = StorageManager::open(StoreOptions::on_disk(dir.path()).file_sizes(64 * KIB, 128 * KIB))?;
    let ctx = OpContext::user();
    let mut locs = Vec::new();
    for n in 0..600 {
        locs.push(store.insert(&ctx, NS, &row(n))?.expect("stored"));
    }
    store.sync_all()?;

    let files = store.file_count("grow");
    assert!(files >= 2);
    assert_eq!(fs::metadata(dir.path().join("grow.0"))?.len(), 64 * 1024);
    for n in 1..files {
        let len = fs::metadata(dir.path().join(format!("grow.{n}")))?.len();
        assert_eq!(len, 128 * 1024, "file {n}");
    }
    assert!(!dir.path().join(format!("grow.{files}")).exists());

    for (n, loc) in locs.iter().enumerate().step_by(37) {
        assert_eq!(store.find(&ctx, NS, *loc)?, row(n));
    }
    Ok(())
}

#[test]
fn record_larger_than_any_file_is_refused() -> Result<()> {
    init_tracing();
    let store = StorageManager::open(small_files())?;
    let ctx = OpContext::user();
    store.insert(&ctx, NS, &row(0))?;

    let huge = doc(json!({ "blob": "h".repeat(300 * 1024) }));
    let err = store.insert(&ctx, NS, &huge).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRequest(_)), "{err}");

    let coll = store.collection(NS)?;
    assert!(!coll.is_poisoned());
    assert_eq!(coll.details().nrecords, 1);
    store.insert(&ctx, NS, &row(1))?;

    let err = store.insert(&ctx, "grow.fresh", &huge).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRequest(_)), "{err}");
    assert!(matches!(store.collection("grow.fresh"), Err(StoreError::NotFound)));
    Ok(())
}

#[test]
fn document_limit_is_enforced_before_allocation() -> Result<()> {
    let store = StorageManager::open(small_files().max_document_len(512))?;
    let ctx = OpContext::user();
    let err = store.insert(&ctx, NS, &doc(json!({ "s": "x".repeat(600) }))).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRequest(_)), "{err}");
    assert!(store.collection(NS).is_err());
    Ok(())
}

#[test]
fn large_first_record_sizes_its_extent() -> Result<()> {
    let store = StorageManager::open(small_files())?;
    let ctx = OpContext::user();
    // 4 + 1996 = 2000 byte payload: at least 1000 bytes, so 16 payloads per extent.
    let first = doc(json!({ "p": "x".repeat(1988) }));
    assert_eq!(first.encode(1 << 20)?.len(), 2000);
    store.insert(&ctx, NS, &first)?;
    assert_eq!(store.collection(NS)?.details().last_extent_size, (2000 * 16) & !0xff);
    Ok(())
}

#[test]
fn invalid_file_sizing_is_rejected_at_open() {
    let bad = StoreOptions::in_memory().file_sizes(64 * KIB + 1, 256 * KIB);
    assert!(matches!(StorageManager::open(bad), Err(StoreError::InvalidRequest(_))));
    let inverted = StoreOptions::in_memory().file_sizes(256 * KIB, 64 * KIB);
    assert!(matches!(StorageManager::open(inverted), Err(StoreError::InvalidRequest(_))));
}
