//! Record storage engine.
//!
//! Places variable-length documents inside extents carved from numbered data
//! files, reuses freed space through a bucketed free list, grows storage one
//! extent at a time and keeps secondary indexes in step with the records.

/// Per-collection metadata and record write paths.
pub mod collection;

/// Natural-order table scans.
pub mod cursor;

/// Data file headers and extent carving.
pub mod datafile;

/// Document type and payload encoding.
pub mod document;

/// Extent headers and sizing heuristics.
pub mod extent;

/// Bucketed free-space allocator.
pub mod freelist;

/// Secondary indexes.
pub mod index;

/// Namespace parsing and reserved names.
pub mod namespace;

/// Record and free block headers.
pub mod record;

mod manager;
mod metrics;
mod options;

pub use collection::{Collection, CollectionDetails};
pub use cursor::{Direction, TableScan};
pub use document::Document;
pub use manager::StorageManager;
pub use metrics::{default_metrics, CounterMetrics, MetricsSnapshot, NoopMetrics, StorageMetrics};
pub use options::{FileSizing, IndexFactory, StoreConfig, StoreOptions};
