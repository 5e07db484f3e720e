use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Trait for tracking record-store activity.
///
/// Implementations collect statistics about record writes, space growth and
/// capped eviction. The store calls these hooks while holding collection
/// locks, so implementations must be cheap and must not block.
pub trait StorageMetrics: Send + Sync {
    /// Records a successful insert.
    fn record_inserted(&self);

    /// Records a delete, including capped evictions.
    fn record_deleted(&self);

    /// Records an update.
    ///
    /// # Parameters
    /// * `in_place` - `true` when the payload fit in the existing record,
    ///   `false` when the update moved the record.
    fn record_updated(&self, in_place: bool);

    /// Records a new extent of `bytes` bytes.
    fn extent_allocated(&self, bytes: u32);

    /// Records a new data file of `bytes` bytes.
    fn file_allocated(&self, bytes: u32);

    /// Records the eviction of the oldest record of a capped collection.
    fn capped_eviction(&self);

    /// Records an index insert or remove that the index rejected.
    fn index_sync_failure(&self);
}

/// A no-op implementation of [`StorageMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn record_inserted(&self) {}
    fn record_deleted(&self) {}
    fn record_updated(&self, _in_place: bool) {}
    fn extent_allocated(&self, _bytes: u32) {}
    fn file_allocated(&self, _bytes: u32) {}
    fn capped_eviction(&self) {}
    fn index_sync_failure(&self) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of records inserted.
    pub records_inserted: AtomicU64,

    /// Number of records deleted.
    pub records_deleted: AtomicU64,

    /// Number of updates applied in place.
    pub updates_in_place: AtomicU64,

    /// Number of updates that moved the record.
    pub updates_moved: AtomicU64,

    /// Number of extents carved.
    pub extents_allocated: AtomicU64,

    /// Total bytes of all carved extents.
    pub extent_bytes: AtomicU64,

    /// Number of data files created.
    pub files_allocated: AtomicU64,

    /// Total bytes of all created data files.
    pub file_bytes: AtomicU64,

    /// Number of records evicted from capped collections.
    pub capped_evictions: AtomicU64,

    /// Number of index operations that failed and were skipped.
    pub index_sync_failures: AtomicU64,
}

impl CounterMetrics {
    /// Captures the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            updates_in_place: self.updates_in_place.load(Ordering::Relaxed),
            updates_moved: self.updates_moved.load(Ordering::Relaxed),
            extents_allocated: self.extents_allocated.load(Ordering::Relaxed),
            extent_bytes: self.extent_bytes.load(Ordering::Relaxed),
            files_allocated: self.files_allocated.load(Ordering::Relaxed),
            file_bytes: self.file_bytes.load(Ordering::Relaxed),
            capped_evictions: self.capped_evictions.load(Ordering::Relaxed),
            index_sync_failures: self.index_sync_failures.load(Ordering::Relaxed),
        }
    }
}

impl StorageMetrics for CounterMetrics {
    fn record_inserted(&self) {
        self.records_inserted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_deleted(&self) {
        self.records_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_updated(&self, in_place: bool) {
        if in_place {
            self.updates_in_place.fetch_add(1, Ordering::Relaxed);
        } else {
            self.updates_moved.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn extent_allocated(&self, bytes: u32) {
        self.extents_allocated.fetch_add(1, Ordering::Relaxed);
        self.extent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn file_allocated(&self, bytes: u32) {
        self.files_allocated.fetch_add(1, Ordering::Relaxed);
        self.file_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn capped_eviction(&self) {
        self.capped_evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn index_sync_failure(&self) {
        self.index_sync_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CounterMetrics`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Records inserted.
    pub records_inserted: u64,
    /// Records deleted.
    pub records_deleted: u64,
    /// Updates applied in place.
    pub updates_in_place: u64,
    /// Updates that moved the record.
    pub updates_moved: u64,
    /// Extents carved.
    pub extents_allocated: u64,
    /// Bytes of carved extents.
    pub extent_bytes: u64,
    /// Data files created.
    pub files_allocated: u64,
    /// Bytes of created data files.
    pub file_bytes: u64,
    /// Capped evictions.
    pub capped_evictions: u64,
    /// Skipped index operations.
    pub index_sync_failures: u64,
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
