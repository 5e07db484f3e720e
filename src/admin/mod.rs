#![forbid(unsafe_code)]

//! Store administration utilities.
//!
//! Bulk loading of JSON-lines files, space statistics and structural
//! verification of extents, record chains, free lists and indexes.

mod error;
mod load;
mod stats;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Bulk loading of newline-delimited JSON documents.
pub use load::{load_json_lines, LoadReport};

/// Record, extent and free-space statistics.
pub use stats::{stats, BucketStats, CollectionStats, DatabaseStats, IndexStats, StatsReport};

/// Structural verification of every collection.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};
