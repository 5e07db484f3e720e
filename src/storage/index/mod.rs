//! Secondary indexes over a collection's documents.
//!
//! The store keeps every index of a collection in step with its records:
//! insert adds each document's keys, delete removes them, and an in-place
//! update applies only the key-set difference. Index failures are logged and
//! skipped; they never undo the record write.

mod keys;
mod ordered;

use std::fmt;

use serde_json::Value;
use tracing::warn;

pub use keys::{diff_keys, extract_keys, IndexKey, KeyDiff, KeyField, KeyPattern};
pub use ordered::{BTreeKeyIndex, IndexError, OrderedIndex};

use crate::storage::document::Document;
use crate::storage::metrics::StorageMetrics;
use crate::types::DiskLoc;

/// Largest accepted key pattern, measured as encoded JSON.
pub const MAX_KEY_PATTERN_LEN: usize = 2048;

/// Parsed index definition document: `{ name, ns, key }`.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexDefinition {
    /// Index name, unique within its collection.
    pub name: String,
    /// Namespace of the indexed collection.
    pub ns: String,
    /// Fields the index is built over.
    pub pattern: KeyPattern,
}

impl IndexDefinition {
    /// Validates an index definition, returning the reason it is unusable.
    pub fn parse(doc: &Document) -> Result<Self, &'static str> {
        let name = match doc.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => return Err("index definition needs a non-empty name"),
        };
        let ns = match doc.get("ns") {
            Some(Value::String(ns)) if !ns.is_empty() => ns.clone(),
            _ => return Err("index definition needs a namespace"),
        };
        let key = match doc.get("key") {
            Some(Value::Object(key)) if !key.is_empty() => Document::from(key.clone()),
            _ => return Err("index definition needs a non-empty key pattern"),
        };
        let pattern_len = serde_json::to_vec(key.as_map()).map(|b| b.len()).unwrap_or(usize::MAX);
        if pattern_len > MAX_KEY_PATTERN_LEN {
            return Err("index key pattern too large");
        }
        let pattern =
            KeyPattern::from_document(&key).map_err(|_| "index key pattern is malformed")?;
        Ok(Self { name, ns, pattern })
    }
}

/// One live index of a collection.
pub struct IndexDescriptor {
    name: String,
    pattern: KeyPattern,
    info: DiskLoc,
    head: Box<dyn OrderedIndex>,
}

impl fmt::Debug for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("info", &self.info)
            .field("entries", &self.head.len())
            .finish()
    }
}

impl IndexDescriptor {
    /// Wraps `head` as the index `name` defined by the record at `info`.
    pub fn new(name: String, pattern: KeyPattern, info: DiskLoc, head: Box<dyn OrderedIndex>) -> Self {
        Self {
            name,
            pattern,
            info,
            head,
        }
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key pattern.
    pub fn pattern(&self) -> &KeyPattern {
        &self.pattern
    }

    /// Location of the index definition record.
    pub fn info(&self) -> DiskLoc {
        self.info
    }

    /// The ordered index.
    pub fn index(&self) -> &dyn OrderedIndex {
        self.head.as_ref()
    }

    /// Adds every key of `doc` for the record at `loc`.
    pub(crate) fn add_document(&mut self, ns: &str, doc: &Document, loc: DiskLoc, metrics: &dyn StorageMetrics) {
        for key in extract_keys(&self.pattern, doc) {
            self.add_key(ns, &key, loc, metrics);
        }
    }

    /// Removes every key of `doc` for the record at `loc`.
    pub(crate) fn remove_document(&mut self, ns: &str, doc: &Document, loc: DiskLoc, metrics: &dyn StorageMetrics) {
        for key in extract_keys(&self.pattern, doc) {
            self.remove_key(ns, &key, loc, metrics);
        }
    }

    /// Applies the key difference between `old` and `new` for a record updated in place.
    pub(crate) fn update_document(
        &mut self,
        ns: &str,
        old: &Document,
        new: &Document,
        loc: DiskLoc,
        metrics: &dyn StorageMetrics,
    ) {
        let diff = diff_keys(&extract_keys(&self.pattern, old), &extract_keys(&self.pattern, new));
        for key in &diff.removed {
            self.remove_key(ns, key, loc, metrics);
        }
        for key in &diff.added {
            self.add_key(ns, key, loc, metrics);
        }
    }

    fn add_key(&mut self, ns: &str, key: &IndexKey, loc: DiskLoc, metrics: &dyn StorageMetrics) {
        if let Err(err) = self.head.insert(key, loc) {
            metrics.index_sync_failure();
            warn!(ns, index = %self.name, loc = %loc, key = %key, error = %err, "index.sync_failure.insert");
        }
    }

    fn remove_key(&mut self, ns: &str, key: &IndexKey, loc: DiskLoc, metrics: &dyn StorageMetrics) {
        match self.head.remove(key, loc) {
            Ok(true) => {}
            // A key the index once rejected has nothing to remove.
            Ok(false) => {}
            Err(err) => {
                metrics.index_sync_failure();
                warn!(ns, index = %self.name, loc = %loc, key = %key, error = %err, "index.sync_failure.remove");
            }
        }
    }
}
