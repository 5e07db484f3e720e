use std::collections::HashSet;

use serde::Serialize;

use crate::admin::Result;
use crate::storage::collection::Collection;
use crate::storage::datafile::FileSet;
use crate::storage::extent::ExtentHeader;
use crate::storage::freelist::bucket;
use crate::storage::index::extract_keys;
use crate::storage::StorageManager;
use crate::types::{DiskLoc, StoreError};

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Collection metadata and extent chains only.
    Fast,
    /// Also record chains, free lists, space accounting and indexes.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Namespace the finding is about.
    pub ns: String,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Collections examined.
    pub collections: u64,
    /// Extents walked.
    pub extents: u64,
    /// Live records walked.
    pub records: u64,
    /// Free blocks walked.
    pub free_blocks: u64,
    /// Bytes held by free blocks.
    pub free_bytes: u64,
    /// Index entries confirmed present.
    pub index_entries: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification found no warning or error.
    pub success: bool,
    /// Issues discovered, capped at a fixed number.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the structures examined.
    pub counts: VerifyCounts,
}

struct Findings<'a> {
    ns: &'a str,
    out: &'a mut Vec<VerifyFinding>,
    failed: &'a mut bool,
}

impl Findings<'_> {
    fn push(&mut self, severity: VerifySeverity, message: impl Into<String>) {
        if severity != VerifySeverity::Info {
            *self.failed = true;
        }
        if self.out.len() < MAX_FINDINGS {
            self.out.push(VerifyFinding {
                severity,
                ns: self.ns.to_owned(),
                message: message.into(),
            });
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Error, message);
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Warning, message);
    }
}

/// Verifies the structural integrity of every collection in `store`.
///
/// Each collection is checked under its own lock. Structural damage found
/// while walking is reported as a finding rather than returned as an error.
///
/// - `VerifyLevel::Fast`: extent chains against the collection metadata
/// - `VerifyLevel::Full`: additionally record chains and counters, bucket
///   placement of every free block, disjointness and full coverage of each
///   extent body by live and free space, and index entries of every record
pub fn verify(store: &StorageManager, level: VerifyLevel) -> Result<VerifyReport> {
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();
    let mut failed = false;

    for coll in store.collections() {
        counts.collections += 1;
        let mut sink = Findings {
            ns: coll.ns(),
            out: &mut findings,
            failed: &mut failed,
        };
        if coll.is_poisoned() {
            sink.error("collection is poisoned by an earlier fatal error");
        }
        match check_collection(&coll, level, &mut sink, &mut counts) {
            Ok(()) => {}
            Err(err @ StoreError::Io(_)) => return Err(err.into()),
            Err(err) => sink.error(format!("walk aborted: {err}")),
        }
    }

    Ok(VerifyReport {
        level,
        success: !failed,
        findings,
        counts,
    })
}

fn check_collection(
    coll: &Collection,
    level: VerifyLevel,
    sink: &mut Findings<'_>,
    counts: &mut VerifyCounts,
) -> crate::types::Result<()> {
    let files = coll.files();
    let st = coll.lock();
    let details = &st.details;

    let extents = walk_extents(files, coll.ns(), details.first_extent, details.last_extent, sink)?;
    counts.extents += extents.len() as u64;
    if !matches!(level, VerifyLevel::Full) {
        return Ok(());
    }

    // (start, len, live) for every region found inside an extent body.
    let mut regions: Vec<(DiskLoc, u32, bool)> = Vec::new();
    let mut live = Vec::new();
    let mut records = 0u64;
    let mut data_size = 0u64;
    for ext in &extents {
        let mut prev = DiskLoc::NULL;
        let mut cur = ext.first_record;
        while !cur.is_null() {
            let header = files.read_record(cur)?;
            if header.extent_ofs != ext.my_loc.ofs() {
                sink.error(format!("record {cur} claims extent offset {:x}", header.extent_ofs));
            }
            if header.prev(cur) != prev {
                sink.error(format!("record {cur} back-link points to {}", header.prev(cur)));
            }
            records += 1;
            data_size += header.net_len() as u64;
            regions.push((cur, header.len, true));
            live.push(cur);
            prev = cur;
            cur = header.next(cur);
            if records > details.nrecords + 1 {
                sink.error("record chain longer than the record count");
                return Ok(());
            }
        }
        if ext.last_record != prev {
            sink.error(format!(
                "extent {} last record {} but chain ends at {prev}",
                ext.my_loc, ext.last_record
            ));
        }
    }
    counts.records += records;
    if records != details.nrecords {
        sink.error(format!("record count {} but {records} records chained", details.nrecords));
    }
    if data_size != details.data_size {
        sink.error(format!("data size {} but records hold {data_size}", details.data_size));
    }

    let extent_ofs: HashSet<DiskLoc> = extents.iter().map(|e| e.my_loc).collect();
    details.free_list.walk(files, |b, loc, block| {
        counts.free_blocks += 1;
        counts.free_bytes += block.len as u64;
        if bucket(block.len) != b {
            sink.error(format!("free block {loc} of {} bytes sits in bucket {b}", block.len));
        }
        if !extent_ofs.contains(&DiskLoc::new(loc.file(), block.extent_ofs)) {
            sink.error(format!("free block {loc} belongs to a foreign extent"));
        }
        regions.push((loc, block.len, false));
        Ok(())
    })?;

    check_coverage(&extents, &mut regions, sink);

    for ix in &st.indexes {
        let mut missing = 0u64;
        for &loc in &live {
            let doc = coll.read_document(loc)?;
            for key in extract_keys(ix.pattern(), &doc) {
                if ix.index().contains(&key, loc) {
                    counts.index_entries += 1;
                } else {
                    missing += 1;
                }
            }
        }
        if missing > 0 {
            sink.warn(format!("index {} lacks {missing} entries", ix.name()));
        }
    }
    Ok(())
}

fn walk_extents(
    files: &FileSet,
    ns: &str,
    first: DiskLoc,
    last: DiskLoc,
    sink: &mut Findings<'_>,
) -> crate::types::Result<Vec<ExtentHeader>> {
    let mut extents: Vec<ExtentHeader> = Vec::new();
    let mut prev = DiskLoc::NULL;
    let mut cur = first;
    while !cur.is_null() {
        if extents.iter().any(|e| e.my_loc == cur) {
            sink.error(format!("extent chain loops back to {cur}"));
            break;
        }
        let ext = files.read_extent(cur)?;
        if ext.ns != ns {
            sink.error(format!("extent {cur} is owned by {}", ext.ns));
        }
        if ext.xprev != prev {
            sink.error(format!("extent {cur} back-link points to {}", ext.xprev));
        }
        if ext.first_record.is_null() != ext.last_record.is_null() {
            sink.error(format!("extent {cur} has only one record endpoint"));
        }
        prev = cur;
        cur = ext.xnext;
        extents.push(ext);
    }
    if prev != last {
        sink.error(format!("last extent is {last} but chain ends at {prev}"));
    }
    Ok(extents)
}

fn check_coverage(extents: &[ExtentHeader], regions: &mut [(DiskLoc, u32, bool)], sink: &mut Findings<'_>) {
    regions.sort_by_key(|(loc, _, _)| *loc);
    for ext in extents {
        let Ok(body) = ext.body_loc() else { continue };
        let end = body.ofs() as u64 + (ext.body_len() & !3) as u64;
        let mut cursor = body.ofs() as u64;
        for &(loc, len, live) in regions
            .iter()
            .filter(|(loc, _, _)| loc.file() == body.file() && (loc.ofs() as u64) >= body.ofs() as u64 && (loc.ofs() as u64) < end)
        {
            let start = loc.ofs() as u64;
            if start < cursor {
                let kind = if live { "record" } else { "free block" };
                sink.error(format!("{kind} at {loc} overlaps the preceding region"));
            } else if start > cursor {
                sink.warn(format!("{} bytes unaccounted before {loc}", start - cursor));
            }
            cursor = cursor.max(start + len as u64);
        }
        if cursor != end {
            sink.warn(format!("extent {} body ends at {end:x} but regions reach {cursor:x}", ext.my_loc));
        }
    }
}
