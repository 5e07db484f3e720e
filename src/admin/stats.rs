use serde::Serialize;

use crate::admin::Result;
use crate::storage::freelist::{BUCKETS, BUCKET_SIZES};
use crate::storage::StorageManager;

/// Space and record accounting for every open database and collection.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub databases: Vec<DatabaseStats>,
    pub collections: Vec<CollectionStats>,
}

/// Data files of one database.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub name: String,
    pub files: usize,
    pub file_bytes: u64,
}

/// Extents, records and free space of one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub ns: String,
    pub capped: bool,
    pub max_records: Option<u64>,
    pub records: u64,
    pub data_bytes: u64,
    pub extents: u64,
    pub extent_bytes: u64,
    pub last_extent_size: u32,
    pub free_bytes: u64,
    pub free_fragments: u64,
    pub buckets: Vec<BucketStats>,
    pub indexes: Vec<IndexStats>,
    pub poisoned: bool,
}

/// Free blocks held by one free-list bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    /// Upper bound of the size class; `None` for the overflow bucket.
    pub class: Option<u32>,
    pub blocks: u64,
    pub bytes: u64,
}

/// Entry count of one secondary index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub name: String,
    pub key: String,
    pub entries: usize,
}

/// Collects a [`StatsReport`], locking each collection in turn.
pub fn stats(store: &StorageManager) -> Result<StatsReport> {
    let mut databases = Vec::new();
    for name in store.database_names() {
        let Some(files) = store.files(&name) else { continue };
        let mut file_bytes = 0u64;
        for n in 0..files.file_count() as u32 {
            file_bytes += files.file(n)?.length() as u64;
        }
        databases.push(DatabaseStats {
            name,
            files: files.file_count(),
            file_bytes,
        });
    }

    let mut collections = Vec::new();
    for coll in store.collections() {
        let poisoned = coll.is_poisoned();
        let files = coll.files();
        let st = coll.lock();
        let details = &st.details;

        let mut extents = 0u64;
        let mut extent_bytes = 0u64;
        let mut cur = details.first_extent;
        while !cur.is_null() {
            let ext = files.read_extent(cur)?;
            extents += 1;
            extent_bytes += ext.length as u64;
            cur = ext.xnext;
        }

        let mut per_bucket = vec![(0u64, 0u64); BUCKETS];
        details.free_list.walk(files, |b, _, block| {
            per_bucket[b].0 += 1;
            per_bucket[b].1 += block.len as u64;
            Ok(())
        })?;
        let buckets = per_bucket
            .iter()
            .enumerate()
            .filter(|(_, (blocks, _))| *blocks > 0)
            .map(|(b, &(blocks, bytes))| BucketStats {
                class: BUCKET_SIZES.get(b).copied(),
                blocks,
                bytes,
            })
            .collect::<Vec<_>>();

        collections.push(CollectionStats {
            ns: coll.ns().to_owned(),
            capped: details.capped,
            max_records: details.max_records,
            records: details.nrecords,
            data_bytes: details.data_size,
            extents,
            extent_bytes,
            last_extent_size: details.last_extent_size,
            free_bytes: buckets.iter().map(|b| b.bytes).sum(),
            free_fragments: buckets.iter().map(|b| b.blocks).sum(),
            buckets,
            indexes: st
                .indexes
                .iter()
                .map(|ix| IndexStats {
                    name: ix.name().to_owned(),
                    key: ix.pattern().document().to_string(),
                    entries: ix.index().len(),
                })
                .collect(),
            poisoned,
        });
    }

    Ok(StatsReport {
        databases,
        collections,
    })
}
