//! Extent-based record store for a document database.
//!
//! Documents live in records inside extents carved from numbered data files.
//! Freed space is recycled through per-collection bucketed free lists, capped
//! collections evict their oldest records, and secondary indexes follow every
//! insert, update and delete.

#![warn(missing_docs)]

pub mod admin;
pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::{Document, StorageManager, StoreOptions};
pub use types::{DiskLoc, OpContext, Privilege, Result, StoreError};
