use crate::storage::extent::MAX_NS_LEN;
use crate::types::{Result, StoreError};

const SYSTEM_DB: &str = "system";
const RESERVED_MARKER: &str = ".system.";
const INDEXES_SUFFIX: &str = ".system.indexes";
const NAMESPACES_SUFFIX: &str = ".system.namespaces";

/// A validated `<db>.<collection>` name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Namespace<'a> {
    full: &'a str,
    split: usize,
}

impl<'a> Namespace<'a> {
    /// Validates `ns`.
    ///
    /// The database part must be non-empty and not `system`; the collection
    /// part must be non-empty; the whole name must fit an extent header.
    pub fn parse(ns: &'a str) -> Result<Self> {
        let Some(split) = ns.find('.') else {
            return Err(StoreError::invalid(format!("namespace {ns:?} has no collection part")));
        };
        if split == 0 || split + 1 == ns.len() {
            return Err(StoreError::invalid(format!("namespace {ns:?} is malformed")));
        }
        if ns.len() > MAX_NS_LEN {
            return Err(StoreError::invalid(format!("namespace {ns:?} is too long")));
        }
        if ns.contains('\0') {
            return Err(StoreError::invalid("namespace contains a NUL byte"));
        }
        if &ns[..split] == SYSTEM_DB {
            return Err(StoreError::invalid(format!("namespace {ns:?} uses the system database")));
        }
        Ok(Self { full: ns, split })
    }

    /// The whole name.
    pub fn as_str(&self) -> &'a str {
        self.full
    }

    /// Database part.
    pub fn db(&self) -> &'a str {
        &self.full[..self.split]
    }

    /// Collection part.
    pub fn collection(&self) -> &'a str {
        &self.full[self.split + 1..]
    }

    /// Returns true for names containing `.system.`.
    pub fn is_reserved(&self) -> bool {
        self.full.contains(RESERVED_MARKER)
    }

    /// Returns true for the index definition catalog of a database.
    pub fn is_index_catalog(&self) -> bool {
        self.full.ends_with(INDEXES_SUFFIX) && self.full.len() == self.split + INDEXES_SUFFIX.len()
    }

    /// Returns true for the namespace catalog of a database.
    pub fn is_namespace_catalog(&self) -> bool {
        self.full.ends_with(NAMESPACES_SUFFIX)
            && self.full.len() == self.split + NAMESPACES_SUFFIX.len()
    }
}

/// Name of the index definition catalog of `db`.
pub fn index_catalog(db: &str) -> String {
    format!("{db}{INDEXES_SUFFIX}")
}

/// Name of the namespace catalog of `db`.
pub fn namespace_catalog(db: &str) -> String {
    format!("{db}{NAMESPACES_SUFFIX}")
}
