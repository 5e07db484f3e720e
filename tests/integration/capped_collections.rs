#![allow(missing_docs)]

use std::sync::Arc;

use extentdb::storage::{CounterMetrics, Document, StorageManager, StoreOptions};
use extentdb::types::{OpContext, Result, StoreError};
use serde_json::{json, Value};

const NS: &str = "log.events";

fn doc(value: Value) -> Document {
    Document::try_from(value).expect("object")
}

fn event(n: i64) -> Document {
    doc(json!({ "n": n, "pad": "x".repeat(48) }))
}

fn capped_store(size: u32, max: Option<u64>) -> Result<(StorageManager, Arc<CounterMetrics>)> {
    let metrics = Arc::new(CounterMetrics::default());
    let store = StorageManager::open(
        StoreOptions::in_memory()
            .file_sizes(1 << 20, 1 << 20)
            .metrics(metrics.clone()),
    )?;
    let mut request = json!({ "capped": true, "size": size });
    if let Some(max) = max {
        request["max"] = json!(max);
    }
    store.create_collection(&OpContext::user(), NS, &doc(request))?;
    Ok((store, metrics))
}

fn scanned(store: &StorageManager) -> Result<Vec<i64>> {
    store
        .scan(NS, None)?
        .map(|row| row.map(|(_, d)| d.get("n").and_then(Value::as_i64).unwrap_or(-1)))
        .collect()
}

#[test]
fn record_ceiling_keeps_newest_records() -> Result<()> {
    let (store, metrics) = capped_store(8192, Some(10))?;
    let ctx = OpContext::user();
    for n in 0..100 {
        store.insert(&ctx, NS, &event(n))?;
        assert!(store.collection(NS)?.details().nrecords <= 10);
    }
    assert_eq!(scanned(&store)?, (90..100).collect::<Vec<_>>());
    assert_eq!(metrics.snapshot().capped_evictions, 90);
    Ok(())
}

#[test]
fn space_bound_collection_never_grows() -> Result<()> {
    let (store, metrics) = capped_store(4096, None)?;
    let ctx = OpContext::user();
    let before = store.collection(NS)?.details();
    for n in 0..500 {
        store.insert(&ctx, NS, &event(n))?;
    }
    let after = store.collection(NS)?.details();
    assert_eq!(after.first_extent, before.first_extent);
    assert_eq!(after.last_extent, before.first_extent);
    assert_eq!(store.file_count("log"), 1);
    assert!(after.nrecords > 10 && after.nrecords < 500);
    // One extent per collection: the capped one and the namespace catalog.
    assert_eq!(metrics.snapshot().extents_allocated, store.collections().len() as u64);

    // Survivors are the newest records, in insertion order.
    let seen = scanned(&store)?;
    assert_eq!(seen.len() as u64, after.nrecords);
    let first = 500 - seen.len() as i64;
    assert_eq!(seen, (first..500).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn oversized_record_is_rejected_without_evicting() -> Result<()> {
    let (store, _) = capped_store(4096, None)?;
    let ctx = OpContext::user();
    for n in 0..5 {
        store.insert(&ctx, NS, &event(n))?;
    }
    let huge = doc(json!({ "blob": "y".repeat(2000) }));
    let err = store.insert(&ctx, NS, &huge).unwrap_err();
    assert!(matches!(err, StoreError::CappedOverflow { .. }), "{err}");

    let coll = store.collection(NS)?;
    assert!(!coll.is_poisoned());
    assert_eq!(coll.details().nrecords, 5);
    assert_eq!(scanned(&store)?, vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn user_deletes_are_refused() -> Result<()> {
    let (store, _) = capped_store(4096, None)?;
    let ctx = OpContext::user();
    let loc = store.insert(&ctx, NS, &event(1))?.expect("stored");
    let err = store.delete(&ctx, NS, loc).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRequest(_)), "{err}");
    assert_eq!(store.collection(NS)?.details().nrecords, 1);
    Ok(())
}

#[test]
fn updates_stay_in_place() -> Result<()> {
    let (store, _) = capped_store(4096, None)?;
    let ctx = OpContext::user();
    let loc = store.insert(&ctx, NS, &event(1))?.expect("stored");

    let shrunk = doc(json!({ "n": 2 }));
    assert_eq!(store.update(&ctx, NS, loc, &shrunk)?, loc);
    assert_eq!(store.find(&ctx, NS, loc)?, shrunk);

    let grown = doc(json!({ "n": 3, "pad": "z".repeat(400) }));
    let err = store.update(&ctx, NS, loc, &grown).unwrap_err();
    assert!(matches!(err, StoreError::CappedOverflow { .. }), "{err}");
    assert_eq!(store.find(&ctx, NS, loc)?, shrunk);
    Ok(())
}

#[test]
fn evicted_records_leave_indexes() -> Result<()> {
    let (store, _) = capped_store(8192, Some(4))?;
    let ctx = OpContext::user();
    store.insert(
        &ctx,
        "log.system.indexes",
        &doc(json!({"name": "n_1", "ns": NS, "key": {"n": 1}})),
    )?
    .expect("index created");
    for n in 0..10 {
        store.insert(&ctx, NS, &event(n))?;
    }
    for n in 0..6 {
        assert!(store.lookup(NS, "n_1", &doc(json!({ "n": n })))?.is_empty(), "n={n}");
    }
    for n in 6..10 {
        assert_eq!(store.lookup(NS, "n_1", &doc(json!({ "n": n })))?.len(), 1, "n={n}");
    }
    Ok(())
}
