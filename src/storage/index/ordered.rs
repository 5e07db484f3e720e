use std::collections::BTreeSet;

use super::keys::IndexKey;
use crate::types::DiskLoc;

/// Failure reported by an [`OrderedIndex`] for a single key operation.
///
/// The store logs these and carries on; they never abort a record write.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum IndexError {
    /// The encoded key is longer than the index accepts.
    #[error("index key of {len} bytes exceeds the {max} byte limit")]
    KeyTooLarge {
        /// Encoded key length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The index refused the operation for an implementation-specific reason.
    #[error("index rejected the operation: {0}")]
    Rejected(String),
}

/// Ordered `(key, location)` set backing one index.
pub trait OrderedIndex: Send {
    /// Adds an entry; adding an existing entry is a no-op.
    fn insert(&mut self, key: &IndexKey, loc: DiskLoc) -> Result<(), IndexError>;

    /// Removes an entry, returning whether it was present.
    fn remove(&mut self, key: &IndexKey, loc: DiskLoc) -> Result<bool, IndexError>;

    /// Locations stored under `key`, in location order.
    fn lookup(&self, key: &IndexKey) -> Vec<DiskLoc>;

    /// Returns true when exactly this entry is present.
    fn contains(&self, key: &IndexKey, loc: DiskLoc) -> bool;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Returns true when the index holds no entry.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`OrderedIndex`] over a `BTreeSet`.
#[derive(Debug, Default)]
pub struct BTreeKeyIndex {
    entries: BTreeSet<(IndexKey, DiskLoc)>,
    max_key_len: usize,
}

impl BTreeKeyIndex {
    /// Creates an empty index rejecting keys longer than `max_key_len`.
    pub fn new(max_key_len: usize) -> Self {
        Self {
            entries: BTreeSet::new(),
            max_key_len,
        }
    }
}

impl OrderedIndex for BTreeKeyIndex {
    fn insert(&mut self, key: &IndexKey, loc: DiskLoc) -> Result<(), IndexError> {
        if key.len() > self.max_key_len {
            return Err(IndexError::KeyTooLarge {
                len: key.len(),
                max: self.max_key_len,
            });
        }
        self.entries.insert((key.clone(), loc));
        Ok(())
    }

    fn remove(&mut self, key: &IndexKey, loc: DiskLoc) -> Result<bool, IndexError> {
        Ok(self.entries.remove(&(key.clone(), loc)))
    }

    fn lookup(&self, key: &IndexKey) -> Vec<DiskLoc> {
        // Null sorts after every real location, so this range spans the key.
        let lo = (key.clone(), DiskLoc::new(0, 0));
        let hi = (key.clone(), DiskLoc::NULL);
        self.entries.range(lo..=hi).map(|(_, loc)| *loc).collect()
    }

    fn contains(&self, key: &IndexKey, loc: DiskLoc) -> bool {
        self.entries.contains(&(key.clone(), loc))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
