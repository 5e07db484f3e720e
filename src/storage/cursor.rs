//! Natural-order table scans.
//!
//! A scan holds its position in a shared slot that the owning collection also
//! references weakly. Deleting a record advances every slot parked on it
//! before the space is freed, so a scan never dereferences a freed location.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::collection::{Collection, CollectionDetails};
use super::datafile::FileSet;
use super::document::Document;
use crate::types::{DiskLoc, Result};

/// Scan order over the record chains.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// First extent to last, head of each chain to tail.
    Forward,
    /// Last extent to first, tail of each chain to head.
    Reverse,
}

impl Direction {
    /// Direction selected by a `{ "$natural": n }` order document; `n < 0` is reverse.
    pub fn from_order(order: Option<&Document>) -> Self {
        match order.and_then(|o| o.get("$natural")).and_then(|v| v.as_f64()) {
            Some(n) if n < 0.0 => Direction::Reverse,
            _ => Direction::Forward,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ScanPosition {
    pub(crate) loc: DiskLoc,
    pub(crate) direction: Direction,
}

/// Weak handles to the positions of a collection's open scans.
#[derive(Default)]
pub(crate) struct CursorRegistry {
    slots: Vec<Weak<Mutex<ScanPosition>>>,
}

impl CursorRegistry {
    pub(crate) fn register(&mut self, pos: &Arc<Mutex<ScanPosition>>) {
        self.slots.retain(|slot| slot.strong_count() > 0);
        self.slots.push(Arc::downgrade(pos));
    }

    /// Number of scans still open.
    pub(crate) fn open(&self) -> usize {
        self.slots.iter().filter(|slot| slot.strong_count() > 0).count()
    }

    /// Moves every scan parked on `loc` to its successor.
    ///
    /// Must run while `loc` is still linked.
    pub(crate) fn about_to_delete(&mut self, files: &FileSet, loc: DiskLoc) -> Result<()> {
        self.slots.retain(|slot| slot.strong_count() > 0);
        for slot in &self.slots {
            let Some(pos) = slot.upgrade() else { continue };
            let mut pos = pos.lock();
            if pos.loc == loc {
                pos.loc = step(files, loc, pos.direction)?;
            }
        }
        Ok(())
    }
}

/// First record in `direction`, skipping empty extents; null for an empty collection.
pub(crate) fn start(files: &FileSet, details: &CollectionDetails, direction: Direction) -> Result<DiskLoc> {
    let mut ext_loc = match direction {
        Direction::Forward => details.first_extent,
        Direction::Reverse => details.last_extent,
    };
    while !ext_loc.is_null() {
        let ext = files.read_extent(ext_loc)?;
        let (rec, next) = match direction {
            Direction::Forward => (ext.first_record, ext.xnext),
            Direction::Reverse => (ext.last_record, ext.xprev),
        };
        if !rec.is_null() {
            return Ok(rec);
        }
        ext_loc = next;
    }
    Ok(DiskLoc::NULL)
}

/// Record after `loc` in `direction`, crossing into later extents and
/// skipping empty ones; null at the end of the collection.
pub(crate) fn step(files: &FileSet, loc: DiskLoc, direction: Direction) -> Result<DiskLoc> {
    let header = files.read_record(loc)?;
    let next = match direction {
        Direction::Forward => header.next(loc),
        Direction::Reverse => header.prev(loc),
    };
    if !next.is_null() {
        return Ok(next);
    }
    let mut ext = files.read_extent(header.extent(loc))?;
    loop {
        let ext_loc = match direction {
            Direction::Forward => ext.xnext,
            Direction::Reverse => ext.xprev,
        };
        if ext_loc.is_null() {
            return Ok(DiskLoc::NULL);
        }
        ext = files.read_extent(ext_loc)?;
        let rec = match direction {
            Direction::Forward => ext.first_record,
            Direction::Reverse => ext.last_record,
        };
        if !rec.is_null() {
            return Ok(rec);
        }
    }
}

/// Cursor over a collection in natural order.
///
/// Records inserted behind the cursor's position are not revisited; records
/// appended past it are seen. Deleting the record the cursor is parked on
/// moves the cursor to that record's successor.
pub struct TableScan {
    coll: Arc<Collection>,
    pos: Arc<Mutex<ScanPosition>>,
}

impl TableScan {
    pub(crate) fn open(coll: Arc<Collection>, direction: Direction) -> Result<Self> {
        let pos = {
            let mut state = coll.lock();
            let loc = start(coll.files(), &state.details, direction)?;
            let pos = Arc::new(Mutex::new(ScanPosition { loc, direction }));
            state.cursors.register(&pos);
            pos
        };
        Ok(Self { coll, pos })
    }

    /// Scan order.
    pub fn direction(&self) -> Direction {
        self.pos.lock().direction
    }

    /// Location the next call to [`TableScan::next_record`] returns; null when exhausted.
    pub fn position(&self) -> DiskLoc {
        self.pos.lock().loc
    }

    /// Returns the current record and advances past it.
    pub fn next_record(&mut self) -> Result<Option<(DiskLoc, Document)>> {
        let _state = self.coll.lock();
        let mut pos = self.pos.lock();
        if pos.loc.is_null() {
            return Ok(None);
        }
        let loc = pos.loc;
        let doc = self.coll.read_document(loc)?;
        pos.loc = step(self.coll.files(), loc, pos.direction)?;
        Ok(Some((loc, doc)))
    }
}

impl Iterator for TableScan {
    type Item = Result<(DiskLoc, Document)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
