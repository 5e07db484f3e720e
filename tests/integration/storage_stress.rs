#![allow(missing_docs)]

use std::collections::BTreeMap;

use extentdb::admin::{stats, verify, VerifyLevel};
use extentdb::storage::datafile::FileSet;
use extentdb::storage::freelist::{Allocation, FreeList};
use extentdb::storage::index::{extract_keys, IndexKey, KeyPattern};
use extentdb::storage::record::{FreeBlock, RecordHeader};
use extentdb::storage::{Document, StorageManager, StoreOptions};
use extentdb::types::{DiskLoc, OpContext, Result, StoreError, NULL_OFS};
use proptest::prelude::*;
use rand::Rng;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};

const SEED: u64 = 0x5eed_e47e;
const OPS: usize = 4_000;
const NAMESPACES: [&str; 2] = ["stress.a", "stress.b"];

fn doc(value: Value) -> Document {
    Document::try_from(value).expect("object")
}

fn random_doc(rng: &mut ChaCha8Rng, serial: u64) -> Document {
    let pad = rng.gen_range(0..600);
    doc(json!({
        "serial": serial,
        "k": rng.gen_range(0..16),
        "pad": "s".repeat(pad),
    }))
}

#[test]
fn randomized_workload_matches_model() -> Result<()> {
    let store = StorageManager::open(StoreOptions::in_memory().file_sizes(256 * 1024, 1024 * 1024))?;
    let ctx = OpContext::user();
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut model: Vec<BTreeMap<DiskLoc, Document>> = vec![BTreeMap::new(), BTreeMap::new()];

    for ns in NAMESPACES {
        store.create_collection(&ctx, ns, &Document::new())?;
        let def = doc(json!({"name": "k_1", "ns": ns, "key": {"k": 1}}));
        store.insert(&ctx, "stress.system.indexes", &def)?.expect("index created");
    }

    let mut serial = 0u64;
    for _ in 0..OPS {
        let which = rng.gen_range(0..NAMESPACES.len());
        let ns = NAMESPACES[which];
        let live = &mut model[which];
        match rng.gen_range(0..10) {
            0..=4 => {
                serial += 1;
                let d = random_doc(&mut rng, serial);
                let loc = store.insert(&ctx, ns, &d)?.expect("stored");
                assert!(live.insert(loc, d).is_none(), "location {loc} handed out twice");
            }
            5..=7 if !live.is_empty() => {
                let idx = rng.gen_range(0..live.len());
                let loc = *live.keys().nth(idx).expect("in range");
                serial += 1;
                let d = random_doc(&mut rng, serial);
                let after = store.update(&ctx, ns, loc, &d)?;
                live.remove(&loc);
                assert!(live.insert(after, d).is_none());
            }
            _ if !live.is_empty() => {
                let idx = rng.gen_range(0..live.len());
                let loc = *live.keys().nth(idx).expect("in range");
                store.delete(&ctx, ns, loc)?;
                live.remove(&loc);
                assert!(matches!(store.find(&ctx, ns, loc), Err(StoreError::NotFound)));
            }
            _ => {}
        }
    }

    for (ns, live) in NAMESPACES.iter().zip(&model) {
        let scanned: BTreeMap<DiskLoc, Document> = store.scan(ns, None)?.collect::<Result<_>>()?;
        assert_eq!(&scanned, live, "{ns}");

        let details = store.collection(ns)?.details();
        assert_eq!(details.nrecords, live.len() as u64);

        for k in 0..16 {
            let mut expected: Vec<DiskLoc> = live
                .iter()
                .filter(|(_, d)| d.get("k").and_then(Value::as_i64) == Some(k))
                .map(|(loc, _)| *loc)
                .collect();
            expected.sort();
            assert_eq!(store.lookup(ns, "k_1", &doc(json!({ "k": k })))?, expected, "{ns} k={k}");
        }
    }

    let report = verify(&store, VerifyLevel::Full).expect("verify");
    assert!(report.success, "{:?}", report.findings);
    let stats = stats(&store).expect("stats");
    for coll in stats.collections.iter().filter(|c| c.ns.starts_with("stress.") && !c.ns.contains(".system.")) {
        assert_eq!(
            coll.free_bytes + coll.data_bytes + 16 * coll.records,
            coll.extent_bytes - 176 * coll.extents,
            "{}",
            coll.ns
        );
    }
    Ok(())
}

const BODY_OFS: u32 = 0x2000;
const BODY_LEN: u32 = 48 * 1024;

#[derive(Debug, Clone)]
enum FreeOp {
    Alloc(u32),
    Free(usize),
    Compact,
}

fn arb_free_op() -> impl Strategy<Value = FreeOp> {
    prop_oneof![
        4 => (16u32..3000).prop_map(FreeOp::Alloc),
        3 => any::<usize>().prop_map(FreeOp::Free),
        1 => Just(FreeOp::Compact),
    ]
}

fn free_total(list: &FreeList, files: &FileSet) -> u64 {
    let mut total = 0u64;
    list.walk(files, |_, _, block| {
        total += block.len as u64;
        Ok(())
    })
    .expect("walk");
    total
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn free_space_is_conserved(ops in prop::collection::vec(arb_free_op(), 1..200)) {
        let files = FileSet::new("prop", &StoreOptions::in_memory().file_sizes(64 * 1024, 64 * 1024)).unwrap();
        files.add_file().unwrap();
        let mut list = FreeList::default();
        list.add(&files, DiskLoc::new(0, BODY_OFS), FreeBlock {
            len: BODY_LEN,
            extent_ofs: BODY_OFS,
            next_free: DiskLoc::NULL,
        }).unwrap();

        let mut live: Vec<Allocation> = Vec::new();
        for op in ops {
            match op {
                FreeOp::Alloc(len) => match list.alloc(&files, len, false) {
                    Ok(got) => {
                        prop_assert!(got.len >= len);
                        prop_assert!(live.iter().all(|a| a.loc != got.loc));
                        live.push(got);
                    }
                    Err(StoreError::OutOfSpace) => {}
                    Err(err) => return Err(TestCaseError::fail(err.to_string())),
                },
                FreeOp::Free(i) if !live.is_empty() => {
                    let a = live.swap_remove(i % live.len());
                    let header = RecordHeader {
                        len: a.len,
                        extent_ofs: a.extent_ofs,
                        next_ofs: NULL_OFS,
                        prev_ofs: NULL_OFS,
                    };
                    list.free(&files, a.loc, header).unwrap();
                }
                FreeOp::Free(_) => {}
                FreeOp::Compact => {
                    list.compact(&files).unwrap();
                }
            }
            let held: u64 = live.iter().map(|a| a.len as u64).sum();
            prop_assert_eq!(free_total(&list, &files) + held, BODY_LEN as u64);
        }

        for a in live.drain(..) {
            let header = RecordHeader {
                len: a.len,
                extent_ofs: a.extent_ofs,
                next_ofs: NULL_OFS,
                prev_ofs: NULL_OFS,
            };
            list.free(&files, a.loc, header).unwrap();
        }
        prop_assert_eq!(list.compact(&files).unwrap(), 1);
        prop_assert_eq!(free_total(&list, &files), BODY_LEN as u64);
    }

    #[test]
    fn numeric_keys_sort_like_numbers(a in any::<i32>(), b in any::<i32>()) {
        let asc = KeyPattern::from_document(&doc(json!({"v": 1}))).unwrap();
        let desc = KeyPattern::from_document(&doc(json!({"v": -1}))).unwrap();
        let (va, vb) = (json!(a), json!(b));
        let ka = IndexKey::from_values(&asc, &[Some(&va)]);
        let kb = IndexKey::from_values(&asc, &[Some(&vb)]);
        prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
        let da = IndexKey::from_values(&desc, &[Some(&va)]);
        let db = IndexKey::from_values(&desc, &[Some(&vb)]);
        prop_assert_eq!(da.cmp(&db), b.cmp(&a));
    }

    #[test]
    fn string_keys_sort_like_strings(a in "[a-z\\x00]{0,8}", b in "[a-z\\x00]{0,8}") {
        let pattern = KeyPattern::from_document(&doc(json!({"s": 1, "t": 1}))).unwrap();
        let (sa, sb, tail) = (json!(a), json!(b), json!(0));
        let ka = IndexKey::from_values(&pattern, &[Some(&sa), Some(&tail)]);
        let kb = IndexKey::from_values(&pattern, &[Some(&sb), Some(&tail)]);
        prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
    }

    #[test]
    fn multikey_yields_one_key_per_distinct_element(items in prop::collection::vec(0i64..20, 0..12)) {
        let pattern = KeyPattern::from_document(&doc(json!({"tags": 1}))).unwrap();
        let keys = extract_keys(&pattern, &doc(json!({ "tags": items.clone() })));
        let distinct: std::collections::BTreeSet<_> = items.iter().collect();
        prop_assert_eq!(keys.len(), distinct.len());
    }
}
