#![allow(missing_docs)]

use std::sync::Arc;

use extentdb::storage::index::{BTreeKeyIndex, IndexError, IndexKey, KeyPattern, OrderedIndex};
use extentdb::storage::{CounterMetrics, Document, StorageManager, StoreOptions};
use extentdb::types::{DiskLoc, OpContext, Result, StoreError};
use serde_json::{json, Value};

const NS: &str = "shop.items";
const CATALOG: &str = "shop.system.indexes";

fn doc(value: Value) -> Document {
    Document::try_from(value).expect("object")
}

fn store() -> Result<StorageManager> {
    StorageManager::open(StoreOptions::in_memory().file_sizes(1 << 20, 4 << 20))
}

fn define(store: &StorageManager, name: &str, ns: &str, key: Value) -> Result<Option<DiskLoc>> {
    store.insert(
        &OpContext::user(),
        CATALOG,
        &doc(json!({ "name": name, "ns": ns, "key": key })),
    )
}

#[test]
fn new_index_is_backfilled_from_existing_records() -> Result<()> {
    let store = store()?;
    let ctx = OpContext::user();
    let mut locs = Vec::new();
    for n in 0..40 {
        locs.push(store.insert(&ctx, NS, &doc(json!({ "n": n % 4, "i": n })))?.expect("stored"));
    }
    let info = define(&store, "n_1", NS, json!({"n": 1}))?.expect("index created");

    assert_eq!(store.index_names(NS)?, vec!["n_1".to_string()]);
    let twos = store.lookup(NS, "n_1", &doc(json!({"n": 2})))?;
    assert_eq!(twos.len(), 10);
    for (i, loc) in locs.iter().enumerate() {
        assert_eq!(twos.contains(loc), i % 4 == 2);
    }

    // The definition itself is an ordinary catalog record.
    let stored = store.find(&ctx, CATALOG, info)?;
    assert_eq!(stored.get_str("name"), Some("n_1"));
    Ok(())
}

#[test]
fn multikey_index_tracks_array_elements() -> Result<()> {
    let store = store()?;
    let ctx = OpContext::user();
    store.create_collection(&ctx, NS, &Document::new())?;
    define(&store, "tags_1", NS, json!({"tags": 1}))?.expect("index created");

    let loc = store.insert(&ctx, NS, &doc(json!({"tags": ["red", "blue"]})))?.expect("stored");
    assert_eq!(store.lookup(NS, "tags_1", &doc(json!({"tags": "red"})))?, vec![loc]);
    assert_eq!(store.lookup(NS, "tags_1", &doc(json!({"tags": "blue"})))?, vec![loc]);

    let moved = store.update(&ctx, NS, loc, &doc(json!({"tags": ["blue", "green"]})))?;
    assert_eq!(moved, loc);
    assert!(store.lookup(NS, "tags_1", &doc(json!({"tags": "red"})))?.is_empty());
    assert_eq!(store.lookup(NS, "tags_1", &doc(json!({"tags": "blue"})))?, vec![loc]);
    assert_eq!(store.lookup(NS, "tags_1", &doc(json!({"tags": "green"})))?, vec![loc]);

    store.delete(&ctx, NS, loc)?;
    assert!(store.lookup(NS, "tags_1", &doc(json!({"tags": "blue"})))?.is_empty());
    Ok(())
}

#[test]
fn compound_index_with_nested_and_missing_fields() -> Result<()> {
    let store = store()?;
    let ctx = OpContext::user();
    store.create_collection(&ctx, NS, &Document::new())?;
    define(&store, "a_1_b.c_-1", NS, json!({"a": 1, "b.c": -1}))?.expect("index created");

    let full = store.insert(&ctx, NS, &doc(json!({"a": 1, "b": {"c": "x"}})))?.expect("stored");
    let partial = store.insert(&ctx, NS, &doc(json!({"a": 1})))?.expect("stored");
    let bare = store.insert(&ctx, NS, &doc(json!({"z": 1})))?.expect("stored");

    assert_eq!(store.lookup(NS, "a_1_b.c_-1", &doc(json!({"a": 1, "b": {"c": "x"}})))?, vec![full]);
    assert_eq!(store.lookup(NS, "a_1_b.c_-1", &doc(json!({"a": 1})))?, vec![partial]);
    // Documents holding none of the indexed fields are not indexed at all.
    assert!(store.lookup(NS, "a_1_b.c_-1", &doc(json!({})))?.is_empty());
    assert!(store.find(&ctx, NS, bare).is_ok());
    Ok(())
}

#[test]
fn unusable_definitions_are_ignored() -> Result<()> {
    let store = store()?;
    let ctx = OpContext::user();
    store.create_collection(&ctx, NS, &Document::new())?;
    define(&store, "n_1", NS, json!({"n": 1}))?.expect("index created");

    assert_eq!(define(&store, "n_1", NS, json!({"m": 1}))?, None, "duplicate name");
    assert_eq!(define(&store, "x_1", "shop.missing", json!({"x": 1}))?, None, "missing target");
    assert_eq!(define(&store, "x_1", "other.items", json!({"x": 1}))?, None, "foreign database");
    assert_eq!(define(&store, "x_1", NS, json!({}))?, None, "empty key");
    assert_eq!(define(&store, "x_1", NS, json!("n"))?, None, "non-object key");
    assert_eq!(
        define(&store, "x_1", "shop.system.namespaces", json!({"name": 1}))?,
        None,
        "reserved target"
    );
    assert_eq!(store.index_names(NS)?, vec!["n_1".to_string()]);

    // Only the accepted definition remains in the catalog.
    let catalog: Vec<_> = store.scan(CATALOG, None)?.collect::<Result<_>>()?;
    assert_eq!(catalog.len(), 1);
    Ok(())
}

#[test]
fn index_limit_per_collection() -> Result<()> {
    let store = StorageManager::open(
        StoreOptions::in_memory()
            .file_sizes(1 << 20, 1 << 20)
            .max_indexes(3),
    )?;
    store.create_collection(&OpContext::user(), NS, &Document::new())?;
    for field in ["a", "b", "c"] {
        define(&store, &format!("{field}_1"), NS, json!({ (field): 1 }))?.expect("index created");
    }
    assert_eq!(define(&store, "d_1", NS, json!({"d": 1}))?, None);
    assert_eq!(store.index_names(NS)?.len(), 3);
    Ok(())
}

#[test]
fn oversized_keys_fail_softly() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let store = StorageManager::open(
        StoreOptions::in_memory()
            .file_sizes(1 << 20, 1 << 20)
            .max_index_key_len(32)
            .metrics(metrics.clone()),
    )?;
    let ctx = OpContext::user();
    store.create_collection(&ctx, NS, &Document::new())?;
    define(&store, "s_1", NS, json!({"s": 1}))?.expect("index created");

    let short = store.insert(&ctx, NS, &doc(json!({"s": "ok"})))?.expect("stored");
    let long = store.insert(&ctx, NS, &doc(json!({"s": "l".repeat(100)})))?.expect("stored");

    assert_eq!(metrics.snapshot().index_sync_failures, 1);
    assert_eq!(store.lookup(NS, "s_1", &doc(json!({"s": "ok"})))?, vec![short]);
    assert!(store.lookup(NS, "s_1", &doc(json!({"s": "l".repeat(100)})))?.is_empty());
    assert_eq!(store.collection(NS)?.details().nrecords, 2);
    assert!(store.find(&ctx, NS, long).is_ok());
    Ok(())
}

/// Index that refuses every key beginning with the string tag.
struct PickyIndex {
    inner: BTreeKeyIndex,
}

impl OrderedIndex for PickyIndex {
    fn insert(&mut self, key: &IndexKey, loc: DiskLoc) -> std::result::Result<(), IndexError> {
        if key.as_bytes().first() == Some(&0x30) {
            return Err(IndexError::Rejected("strings not accepted".into()));
        }
        self.inner.insert(key, loc)
    }

    fn remove(&mut self, key: &IndexKey, loc: DiskLoc) -> std::result::Result<bool, IndexError> {
        self.inner.remove(key, loc)
    }

    fn lookup(&self, key: &IndexKey) -> Vec<DiskLoc> {
        self.inner.lookup(key)
    }

    fn contains(&self, key: &IndexKey, loc: DiskLoc) -> bool {
        self.inner.contains(key, loc)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[test]
fn custom_index_factory_rejections_do_not_fail_writes() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let store = StorageManager::open(
        StoreOptions::in_memory()
            .file_sizes(1 << 20, 1 << 20)
            .metrics(metrics.clone())
            .index_factory(Arc::new(|_: &KeyPattern, max: usize| {
                Box::new(PickyIndex {
                    inner: BTreeKeyIndex::new(max),
                }) as Box<dyn OrderedIndex>
            })),
    )?;
    let ctx = OpContext::user();
    store.create_collection(&ctx, NS, &Document::new())?;
    define(&store, "v_1", NS, json!({"v": 1}))?.expect("index created");

    let num = store.insert(&ctx, NS, &doc(json!({"v": 1})))?.expect("stored");
    let text = store.insert(&ctx, NS, &doc(json!({"v": "one"})))?.expect("stored");
    assert_eq!(metrics.snapshot().index_sync_failures, 1);
    assert_eq!(store.lookup(NS, "v_1", &doc(json!({"v": 1})))?, vec![num]);

    // Updating the rejected record to an acceptable key indexes it.
    assert_eq!(store.update(&ctx, NS, text, &doc(json!({"v": 2})))?, text);
    assert_eq!(store.lookup(NS, "v_1", &doc(json!({"v": 2})))?, vec![text]);
    Ok(())
}

#[test]
fn reserved_namespaces_need_system_privilege() -> Result<()> {
    let store = store()?;
    let user = OpContext::user();
    let entry = doc(json!({"name": "shop.fake"}));
    let err = store.insert(&user, "shop.system.namespaces", &entry).unwrap_err();
    assert!(matches!(err, StoreError::Unauthorized { .. }), "{err}");
    assert!(store.insert(&OpContext::system(), "shop.system.namespaces", &entry)?.is_some());

    let err = store.insert(&user, "system.items", &entry).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRequest(_)), "{err}");

    // Creating a collection records it in the namespace catalog.
    store.insert(&user, NS, &doc(json!({"n": 1})))?;
    let names: Vec<String> = store
        .scan("shop.system.namespaces", None)?
        .map(|row| row.map(|(_, d)| d.get_str("name").unwrap_or_default().to_owned()))
        .collect::<Result<_>>()?;
    assert!(names.contains(&NS.to_string()), "{names:?}");
    Ok(())
}
