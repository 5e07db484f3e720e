use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::datafile::DATA_FILE_HEADER_LEN;
use super::extent::EXTENT_HEADER_LEN;
use super::index::{BTreeKeyIndex, KeyPattern, OrderedIndex};
use super::metrics::StorageMetrics;
use crate::types::{Result, StoreError};

/// Builds the ordered index backing one index definition.
///
/// Receives the key pattern and the configured maximum key length.
pub type IndexFactory = Arc<dyn Fn(&KeyPattern, usize) -> Box<dyn OrderedIndex> + Send + Sync>;

const DEFAULT_BASE_FILE_SIZE: u32 = 64 * 1024 * 1024;
const DEFAULT_MAX_FILE_SIZE: u32 = 0x7ff0_0000;
const DEFAULT_DOUBLING_FILES: u32 = 5;
const DEFAULT_MAPPING_GRANULARITY: u32 = 4096;
const DEFAULT_MAX_DOCUMENT_LEN: u32 = 16 * 1024 * 1024;
const DEFAULT_MAX_INDEXES: usize = 10;
const DEFAULT_MAX_INDEX_KEY_LEN: usize = 1024;

/// Configuration options supplied when opening a [`super::StorageManager`].
#[derive(Clone)]
pub struct StoreOptions {
    /// Directory holding the data files; `None` keeps every file in memory.
    pub dir: Option<PathBuf>,
    /// Capacity of data file 0.
    pub base_file_size: u32,
    /// Capacity ceiling for any data file.
    pub max_file_size: u32,
    /// Number of leading files whose capacity doubles from `base_file_size`.
    pub doubling_files: u32,
    /// Every file capacity must be a multiple of this.
    pub mapping_granularity: u32,
    /// Largest accepted encoded document.
    pub max_document_len: u32,
    /// Maximum number of indexes per collection.
    pub max_indexes: usize,
    /// Maximum encoded index key length handed to the index factory.
    pub max_index_key_len: usize,
    /// Constructor for the ordered index collaborator.
    pub index_factory: IndexFactory,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn StorageMetrics>>,
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("dir", &self.dir)
            .field("base_file_size", &self.base_file_size)
            .field("max_file_size", &self.max_file_size)
            .field("doubling_files", &self.doubling_files)
            .field("mapping_granularity", &self.mapping_granularity)
            .field("max_document_len", &self.max_document_len)
            .field("max_indexes", &self.max_indexes)
            .field("max_index_key_len", &self.max_index_key_len)
            .finish_non_exhaustive()
    }
}

impl StoreOptions {
    /// Options for a store whose files live only in memory.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            base_file_size: DEFAULT_BASE_FILE_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            doubling_files: DEFAULT_DOUBLING_FILES,
            mapping_granularity: DEFAULT_MAPPING_GRANULARITY,
            max_document_len: DEFAULT_MAX_DOCUMENT_LEN,
            max_indexes: DEFAULT_MAX_INDEXES,
            max_index_key_len: DEFAULT_MAX_INDEX_KEY_LEN,
            index_factory: Arc::new(|_pattern: &KeyPattern, max_key_len: usize| {
                Box::new(BTreeKeyIndex::new(max_key_len)) as Box<dyn OrderedIndex>
            }),
            metrics: None,
        }
    }

    /// Options for a store whose files live under `dir`.
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self::in_memory().dir(dir)
    }

    /// Sets the data directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Sets the first file capacity and the capacity ceiling.
    pub fn file_sizes(mut self, base: u32, max: u32) -> Self {
        self.base_file_size = base;
        self.max_file_size = max;
        self
    }

    /// Sets how many leading files double in capacity.
    pub fn doubling_files(mut self, files: u32) -> Self {
        self.doubling_files = files;
        self
    }

    /// Sets the mapping granularity.
    pub fn mapping_granularity(mut self, bytes: u32) -> Self {
        self.mapping_granularity = bytes;
        self
    }

    /// Sets the largest accepted encoded document.
    pub fn max_document_len(mut self, bytes: u32) -> Self {
        self.max_document_len = bytes;
        self
    }

    /// Sets the per-collection index limit.
    pub fn max_indexes(mut self, count: usize) -> Self {
        self.max_indexes = count;
        self
    }

    /// Sets the maximum index key length.
    pub fn max_index_key_len(mut self, bytes: usize) -> Self {
        self.max_index_key_len = bytes;
        self
    }

    /// Replaces the ordered index constructor.
    pub fn index_factory(mut self, factory: IndexFactory) -> Self {
        self.index_factory = factory;
        self
    }

    /// Sets the metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Applies every value present in `config`.
    pub fn with_config(mut self, config: &StoreConfig) -> Self {
        if let Some(dir) = &config.dir {
            self.dir = Some(dir.clone());
        }
        if let Some(v) = config.base_file_size {
            self.base_file_size = v;
        }
        if let Some(v) = config.max_file_size {
            self.max_file_size = v;
        }
        if let Some(v) = config.doubling_files {
            self.doubling_files = v;
        }
        if let Some(v) = config.mapping_granularity {
            self.mapping_granularity = v;
        }
        if let Some(v) = config.max_document_len {
            self.max_document_len = v;
        }
        if let Some(v) = config.max_indexes {
            self.max_indexes = v;
        }
        if let Some(v) = config.max_index_key_len {
            self.max_index_key_len = v;
        }
        self
    }

    /// File sizing policy derived from these options.
    pub fn sizing(&self) -> FileSizing {
        FileSizing {
            base: self.base_file_size,
            max: self.max_file_size,
            doubling: self.doubling_files,
        }
    }

    /// Rejects option combinations the file layer cannot honour.
    pub fn validate(&self) -> Result<()> {
        let granularity = self.mapping_granularity;
        if granularity == 0 || granularity % 4 != 0 {
            return Err(StoreError::invalid(
                "mapping granularity must be a non-zero multiple of 4",
            ));
        }
        let smallest = DATA_FILE_HEADER_LEN + EXTENT_HEADER_LEN as u32;
        for (name, size) in [
            ("base_file_size", self.base_file_size),
            ("max_file_size", self.max_file_size),
        ] {
            if size % granularity != 0 {
                return Err(StoreError::invalid(format!(
                    "{name} {size} is not a multiple of the mapping granularity {granularity}"
                )));
            }
            if size <= smallest {
                return Err(StoreError::invalid(format!(
                    "{name} {size} cannot hold a file header and an extent"
                )));
            }
        }
        if self.base_file_size > self.max_file_size {
            return Err(StoreError::invalid(
                "base_file_size exceeds max_file_size",
            ));
        }
        if self.max_document_len < 4 {
            return Err(StoreError::invalid("max_document_len is too small"));
        }
        Ok(())
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Capacity policy for the numbered data files of one database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileSizing {
    /// Capacity of file 0.
    pub base: u32,
    /// Capacity ceiling.
    pub max: u32,
    /// Number of doubling files.
    pub doubling: u32,
}

impl FileSizing {
    /// Capacity of data file `n`: doubling from `base`, then fixed at `max`.
    ///
    /// Stays a multiple of the granularity whenever `base` and `max` are.
    pub fn capacity(&self, n: u32) -> u32 {
        if n >= self.doubling || n >= 32 {
            return self.max;
        }
        ((self.base as u64) << n).min(self.max as u64) as u32
    }
}

/// Serde mirror of the scalar [`StoreOptions`], loaded from a config file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Data directory.
    pub dir: Option<PathBuf>,
    /// Capacity of data file 0.
    pub base_file_size: Option<u32>,
    /// Capacity ceiling.
    pub max_file_size: Option<u32>,
    /// Number of doubling files.
    pub doubling_files: Option<u32>,
    /// Mapping granularity.
    pub mapping_granularity: Option<u32>,
    /// Largest accepted encoded document.
    pub max_document_len: Option<u32>,
    /// Per-collection index limit.
    pub max_indexes: Option<usize>,
    /// Maximum index key length.
    pub max_index_key_len: Option<usize>,
}
