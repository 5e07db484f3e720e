#![forbid(unsafe_code)]
//! Identifiers, error taxonomy, and caller context shared by every layer.

use std::fmt;

/// Sentinel stored in 32-bit in-file offset fields for "no record".
pub const NULL_OFS: u32 = u32::MAX;

const NULL_FILE: u32 = u32::MAX;

/// Location of any addressable unit (record, free block, extent) inside a file set.
///
/// Encoded on disk as two little-endian `u32`s: file index then byte offset.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DiskLoc {
    file: u32,
    ofs: u32,
}

impl DiskLoc {
    /// The reserved null handle.
    pub const NULL: DiskLoc = DiskLoc {
        file: NULL_FILE,
        ofs: 0,
    };

    /// Encoded width in bytes.
    pub const ENCODED_LEN: usize = 8;

    /// Builds a handle for `ofs` within data file `file`.
    pub const fn new(file: u32, ofs: u32) -> Self {
        debug_assert!(file != NULL_FILE);
        Self { file, ofs }
    }

    /// Returns true for the null handle.
    pub const fn is_null(&self) -> bool {
        self.file == NULL_FILE
    }

    /// Data file index.
    pub const fn file(&self) -> u32 {
        self.file
    }

    /// Byte offset within the data file.
    pub const fn ofs(&self) -> u32 {
        self.ofs
    }

    /// Returns the handle `delta` bytes further into the same file.
    pub fn advance(&self, delta: u32) -> Result<Self> {
        let ofs = self
            .ofs
            .checked_add(delta)
            .ok_or(StoreError::Corruption("disk location offset overflow"))?;
        Ok(Self::new(self.file, ofs))
    }

    /// Returns the handle at `ofs` in the same file, or null when `ofs` is [`NULL_OFS`].
    pub fn with_ofs(&self, ofs: u32) -> Self {
        if ofs == NULL_OFS {
            DiskLoc::NULL
        } else {
            Self::new(self.file, ofs)
        }
    }

    /// Encodes the handle into `dst[..8]`.
    pub fn encode(&self, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&self.file.to_le_bytes());
        dst[4..8].copy_from_slice(&self.ofs.to_le_bytes());
    }

    /// Decodes a handle from `src[..8]`.
    pub fn decode(src: &[u8]) -> Self {
        let mut file = [0u8; 4];
        let mut ofs = [0u8; 4];
        file.copy_from_slice(&src[..4]);
        ofs.copy_from_slice(&src[4..8]);
        let file = u32::from_le_bytes(file);
        if file == NULL_FILE {
            return DiskLoc::NULL;
        }
        Self {
            file,
            ofs: u32::from_le_bytes(ofs),
        }
    }
}

impl Default for DiskLoc {
    fn default() -> Self {
        DiskLoc::NULL
    }
}

impl fmt::Debug for DiskLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for DiskLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}:{:x}", self.file, self.ofs)
        }
    }
}

/// Privilege level of the caller issuing a storage operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Privilege {
    /// Ordinary client; reserved namespaces are off limits except index definitions.
    User,
    /// Internal bookkeeping; may write reserved namespaces.
    System,
}

/// Explicit per-call context threaded through the storage manager.
#[derive(Copy, Clone, Debug)]
pub struct OpContext {
    /// Privilege the caller presents.
    pub privilege: Privilege,
}

impl OpContext {
    /// Context for an ordinary client.
    pub const fn user() -> Self {
        Self {
            privilege: Privilege::User,
        }
    }

    /// Context for internal writes.
    pub const fn system() -> Self {
        Self {
            privilege: Privilege::System,
        }
    }

    /// Returns true when reserved namespaces may be written.
    pub fn is_system(&self) -> bool {
        self.privilege == Privilege::System
    }
}

/// Errors surfaced by the record store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The free list had no block large enough.
    #[error("out of space")]
    OutOfSpace,
    /// A capped collection could not take the write.
    #[error("capped collection {ns} cannot accommodate the write")]
    CappedOverflow {
        /// Namespace of the capped collection.
        ns: String,
    },
    /// A record header or payload is inconsistent with its placement.
    #[error("corrupt record at {loc}: {reason}")]
    CorruptRecord {
        /// Location of the damaged record.
        loc: DiskLoc,
        /// What check failed.
        reason: &'static str,
    },
    /// A structural header (file, extent, free block) failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Malformed request; nothing was changed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Write to a reserved namespace without system privilege.
    #[error("unauthorized write to reserved namespace {ns}")]
    Unauthorized {
        /// The reserved namespace.
        ns: String,
    },
    /// Collection creation for a name that already exists.
    #[error("collection already exists: {ns}")]
    CollectionExists {
        /// The existing namespace.
        ns: String,
    },
    /// Collection or record not found.
    #[error("not found")]
    NotFound,
    /// A hard iteration ceiling was exceeded.
    #[error("runaway guard tripped: {0}")]
    RunawayGuard(&'static str),
    /// The collection hit a fatal error earlier and refuses further writes.
    #[error("collection {ns} is poisoned by an earlier fatal error")]
    Poisoned {
        /// Namespace of the poisoned collection.
        ns: String,
    },
}

impl StoreError {
    /// Returns true for errors that indicate structural damage or a broken invariant.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptRecord { .. }
                | StoreError::Corruption(_)
                | StoreError::RunawayGuard(_)
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidRequest(msg.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
