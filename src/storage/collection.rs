//! Per-collection metadata and the record-level write paths.
//!
//! Every mutation of a collection runs under its state lock: allocation,
//! chain linking, counters, index upkeep and cursor advisories happen as one
//! critical section. A fatal error poisons the collection so later writes
//! fail fast instead of building on damaged structures.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, trace};

use super::cursor::{self, CursorRegistry, Direction};
use super::datafile::FileSet;
use super::document::Document;
use super::extent::{followup_extent_size, ExtentHeader, EXTENT_HEADER_LEN};
use super::freelist::{quantize, Allocation, FreeList};
use super::index::IndexDescriptor;
use super::metrics::StorageMetrics;
use super::record::{FreeBlock, RecordHeader, RECORD_HEADER_LEN};
use crate::types::{DiskLoc, Result, StoreError, NULL_OFS};

/// Eviction passes after which a capped allocation gives up.
const MAX_EVICTION_PASSES: u32 = 5000;

/// Persistent metadata of one collection.
#[derive(Clone, Debug)]
pub struct CollectionDetails {
    /// Namespace.
    pub ns: String,
    /// Head of the extent chain.
    pub first_extent: DiskLoc,
    /// Tail of the extent chain.
    pub last_extent: DiskLoc,
    /// Length of the most recently added extent.
    pub last_extent_size: u32,
    /// Live records.
    pub nrecords: u64,
    /// Sum of the net lengths of live records.
    pub data_size: u64,
    /// Whether the collection evicts its oldest records to make room.
    pub capped: bool,
    /// Record ceiling of a capped collection.
    pub max_records: Option<u64>,
    /// Bucketed free space.
    pub free_list: FreeList,
}

impl CollectionDetails {
    fn new(ns: &str, capped: bool, max_records: Option<u64>) -> Self {
        Self {
            ns: ns.to_owned(),
            first_extent: DiskLoc::NULL,
            last_extent: DiskLoc::NULL,
            last_extent_size: 0,
            nrecords: 0,
            data_size: 0,
            capped,
            max_records,
            free_list: FreeList::default(),
        }
    }

    fn below_ceiling(&self) -> bool {
        self.max_records.map_or(true, |max| self.nrecords < max)
    }
}

/// Creation parameters for a collection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CreateParams {
    pub capped: bool,
    pub max_records: Option<u64>,
    pub extent_size: u32,
    pub min_extent: u32,
}

/// Lock-protected state of a collection.
pub(crate) struct CollectionState {
    pub(crate) details: CollectionDetails,
    pub(crate) indexes: Vec<IndexDescriptor>,
    pub(crate) cursors: CursorRegistry,
    poisoned: bool,
}

/// A collection: its metadata behind a lock plus the files it lives in.
pub struct Collection {
    ns: String,
    files: Arc<FileSet>,
    metrics: Arc<dyn StorageMetrics>,
    state: Mutex<CollectionState>,
}

impl Collection {
    /// Creates the collection and its first extent.
    pub(crate) fn create(
        files: Arc<FileSet>,
        metrics: Arc<dyn StorageMetrics>,
        ns: &str,
        params: CreateParams,
    ) -> Result<Self> {
        let coll = Self {
            ns: ns.to_owned(),
            files,
            metrics,
            state: Mutex::new(CollectionState {
                details: CollectionDetails::new(ns, params.capped, params.max_records),
                indexes: Vec::new(),
                cursors: CursorRegistry::default(),
                poisoned: false,
            }),
        };
        {
            let mut st = coll.state.lock();
            coll.add_extent(&mut st, params.extent_size, params.min_extent)?;
        }
        info!(ns, capped = params.capped, max = ?params.max_records, extent = params.extent_size, "collection.new");
        Ok(coll)
    }

    /// Namespace.
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// Returns true once a fatal error has poisoned the collection.
    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned
    }

    /// Snapshot of the metadata.
    pub fn details(&self) -> CollectionDetails {
        self.state.lock().details.clone()
    }

    pub(crate) fn files(&self) -> &FileSet {
        &self.files
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CollectionState> {
        self.state.lock()
    }

    /// Runs a mutation under the state lock, poisoning the collection on a fatal error.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut CollectionState) -> Result<T>) -> Result<T> {
        let mut st = self.state.lock();
        if st.poisoned {
            return Err(StoreError::Poisoned {
                ns: self.ns.clone(),
            });
        }
        let out = f(&mut *st);
        if let Err(err) = &out {
            if err.is_fatal() {
                st.poisoned = true;
                error!(ns = %self.ns, error = %err, "collection.poisoned");
            }
        }
        out
    }

    /// Carves a new extent, chains it at the tail and frees its body.
    pub(crate) fn add_extent(&self, st: &mut CollectionState, wanted: u32, min: u32) -> Result<DiskLoc> {
        let (loc, len) = self.files.carve_extent(wanted, min)?;
        let mut ext = ExtentHeader::new(loc, &self.ns, len);
        ext.xprev = st.details.last_extent;
        self.files.write_extent(&ext)?;
        if st.details.last_extent.is_null() {
            st.details.first_extent = loc;
        } else {
            let mut prev = self.files.read_extent(st.details.last_extent)?;
            prev.xnext = loc;
            self.files.write_extent(&prev)?;
        }
        st.details.last_extent = loc;
        st.details.last_extent_size = len;

        let body = FreeBlock {
            len: ext.body_len() & !3,
            extent_ofs: loc.ofs(),
            next_free: DiskLoc::NULL,
        };
        st.details.free_list.add(&self.files, ext.body_loc()?, body)?;
        self.metrics.extent_allocated(len);
        debug!(ns = %self.ns, loc = %loc, len, wanted, "extent.new");
        Ok(loc)
    }

    fn alloc(&self, st: &mut CollectionState, len_with_header: u32) -> Result<Allocation> {
        if st.details.capped {
            return self.alloc_capped(st, len_with_header);
        }
        match st.details.free_list.alloc(&self.files, len_with_header, false) {
            Err(StoreError::OutOfSpace) => {
                let record_len = quantize(len_with_header)?;
                let payload_len = len_with_header.saturating_sub(RECORD_HEADER_LEN as u32);
                let wanted = followup_extent_size(payload_len, st.details.last_extent_size)?;
                self.add_extent(st, wanted, EXTENT_HEADER_LEN as u32 + record_len)?;
                st.details.free_list.alloc(&self.files, len_with_header, false)
            }
            other => other,
        }
    }

    /// Evicts oldest records until the allocation fits.
    fn alloc_capped(&self, st: &mut CollectionState, len_with_header: u32) -> Result<Allocation> {
        if len_with_header as u64 * 5 > st.details.last_extent_size as u64 {
            return Err(StoreError::CappedOverflow {
                ns: self.ns.clone(),
            });
        }
        let mut passes = 0u32;
        loop {
            if st.details.below_ceiling() {
                match st.details.free_list.alloc(&self.files, len_with_header, true) {
                    Err(StoreError::OutOfSpace) => {}
                    other => return other,
                }
            }
            let oldest = cursor::start(&self.files, &st.details, Direction::Forward)?;
            if oldest.is_null() {
                return Err(StoreError::RunawayGuard(
                    "capped collection is empty and still cannot allocate",
                ));
            }
            passes += 1;
            if passes > MAX_EVICTION_PASSES {
                return Err(StoreError::RunawayGuard("capped eviction exceeded its pass limit"));
            }
            trace!(ns = %self.ns, loc = %oldest, passes, "alloc.capped.evict");
            self.delete_record(st, oldest)?;
            self.metrics.capped_eviction();
            st.details.free_list.compact(&self.files)?;
        }
    }

    /// Stores `payload` (the encoding of `doc`) as a new record at the chain tail.
    pub(crate) fn insert_record(&self, st: &mut CollectionState, payload: &[u8], doc: &Document) -> Result<DiskLoc> {
        let len = u32::try_from(RECORD_HEADER_LEN + payload.len())
            .map_err(|_| StoreError::invalid("record length overflow"))?;
        let granted = self.alloc(st, len)?;
        let loc = granted.loc;
        let mut ext = self.files.read_extent(DiskLoc::new(loc.file(), granted.extent_ofs))?;
        let mut header = RecordHeader {
            len: granted.len,
            extent_ofs: granted.extent_ofs,
            next_ofs: NULL_OFS,
            prev_ofs: NULL_OFS,
        };
        if ext.last_record.is_null() {
            ext.first_record = loc;
        } else {
            let tail = ext.last_record;
            let mut prev = self.files.read_record(tail)?;
            prev.next_ofs = loc.ofs();
            self.files.write_record(tail, &prev)?;
            header.prev_ofs = tail.ofs();
        }
        ext.last_record = loc;
        self.files.write_record(loc, &header)?;
        self.files.write_payload(loc, payload)?;
        self.files.write_extent(&ext)?;

        st.details.nrecords += 1;
        st.details.data_size += header.net_len() as u64;
        for ix in &mut st.indexes {
            ix.add_document(&self.ns, doc, loc, self.metrics.as_ref());
        }
        self.metrics.record_inserted();
        trace!(ns = %self.ns, loc = %loc, len = header.len, "record.insert");
        Ok(loc)
    }

    /// Unindexes, unlinks and frees the record at `loc`.
    pub(crate) fn delete_record(&self, st: &mut CollectionState, loc: DiskLoc) -> Result<()> {
        let header = self.files.read_record(loc)?;
        st.cursors.about_to_delete(&self.files, loc)?;
        if !st.indexes.is_empty() {
            let doc = self.decode_at(loc, &header)?;
            for ix in &mut st.indexes {
                ix.remove_document(&self.ns, &doc, loc, self.metrics.as_ref());
            }
        }

        let prev = header.prev(loc);
        let next = header.next(loc);
        if !prev.is_null() {
            let mut p = self.files.read_record(prev)?;
            p.next_ofs = header.next_ofs;
            self.files.write_record(prev, &p)?;
        }
        if !next.is_null() {
            let mut n = self.files.read_record(next)?;
            n.prev_ofs = header.prev_ofs;
            self.files.write_record(next, &n)?;
        }
        if prev.is_null() || next.is_null() {
            let mut ext = self.files.read_extent(header.extent(loc))?;
            if prev.is_null() {
                ext.first_record = next;
            }
            if next.is_null() {
                ext.last_record = prev;
            }
            self.files.write_extent(&ext)?;
        }

        let details = &mut st.details;
        details.nrecords = details
            .nrecords
            .checked_sub(1)
            .ok_or(StoreError::Corruption("record count underflow"))?;
        details.data_size = details
            .data_size
            .checked_sub(header.net_len() as u64)
            .ok_or(StoreError::Corruption("data size underflow"))?;
        details.free_list.free(&self.files, loc, header)?;
        self.metrics.record_deleted();
        trace!(ns = %self.ns, loc = %loc, len = header.len, "record.delete");
        Ok(())
    }

    /// Replaces the record at `loc`, in place when it fits.
    ///
    /// Returns the record's location afterwards, which differs from `loc`
    /// when the update had to move the record.
    pub(crate) fn update_record(
        &self,
        st: &mut CollectionState,
        loc: DiskLoc,
        payload: &[u8],
        doc: &Document,
    ) -> Result<DiskLoc> {
        let header = self.files.read_record(loc)?;
        if payload.len() as u64 > header.net_len() as u64 {
            if st.details.capped {
                return Err(StoreError::CappedOverflow {
                    ns: self.ns.clone(),
                });
            }
            self.delete_record(st, loc)?;
            let moved = self.insert_record(st, payload, doc)?;
            self.metrics.record_updated(false);
            debug!(ns = %self.ns, from = %loc, to = %moved, "record.update.moved");
            return Ok(moved);
        }

        if !st.indexes.is_empty() {
            let old = self.decode_at(loc, &header)?;
            for ix in &mut st.indexes {
                ix.update_document(&self.ns, &old, doc, loc, self.metrics.as_ref());
            }
        }
        self.files.write_payload(loc, payload)?;
        self.metrics.record_updated(true);
        trace!(ns = %self.ns, loc = %loc, "record.update.in_place");
        Ok(loc)
    }

    /// Decodes the document of a record known to be live.
    pub(crate) fn read_document(&self, loc: DiskLoc) -> Result<Document> {
        let header = self.files.read_record(loc)?;
        self.decode_at(loc, &header)
    }

    fn decode_at(&self, loc: DiskLoc, header: &RecordHeader) -> Result<Document> {
        let payload = self.files.read_payload(loc, header)?;
        Document::decode(loc, &payload)
    }

    /// Confirms that a caller-supplied `loc` is a live record of this collection.
    ///
    /// Anything that does not check out, short of an I/O failure, is
    /// [`StoreError::NotFound`].
    pub(crate) fn check_live(&self, loc: DiskLoc) -> Result<()> {
        let probe = || -> Result<bool> {
            if loc.is_null() || loc.ofs() % 4 != 0 {
                return Ok(false);
            }
            let header = self.files.read_record(loc)?;
            let ext = self.files.read_extent(header.extent(loc))?;
            if ext.ns != self.ns {
                return Ok(false);
            }
            let prev = header.prev(loc);
            if prev.is_null() {
                return Ok(ext.first_record == loc);
            }
            Ok(self.files.read_record(prev)?.next(prev) == loc)
        };
        match probe() {
            Ok(true) => Ok(()),
            Err(StoreError::Io(err)) => Err(StoreError::Io(err)),
            Ok(false) | Err(_) => Err(StoreError::NotFound),
        }
    }
}
