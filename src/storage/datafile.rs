//! Numbered data files of one database and the growth loop that carves
//! extents out of them.
//!
//! Each file starts with a fixed header recording its capacity and the
//! unused tail from which new extents are carved. Files are created on demand
//! and never shrink.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::extent::{ExtentHeader, EXTENT_HEADER_LEN};
use super::metrics::{default_metrics, StorageMetrics};
use super::options::{FileSizing, StoreOptions};
use super::record::{FreeBlock, RecordHeader, RECORD_HEADER_LEN};
use crate::primitives::bytes::le;
use crate::primitives::io::{FileIo, MemFileIo, StdFileIo};
use crate::types::{DiskLoc, Result, StoreError};

/// Bytes reserved for the data file header; extents start after it.
pub const DATA_FILE_HEADER_LEN: u32 = 8192;

const DATA_FILE_MAGIC: u32 = 0x5844_4246;
const DATA_FILE_VERSION: u32 = 1;
const HEADER_FIELDS_LEN: usize = 24;

/// Growth attempts after which each further attempt is logged as a warning.
const GROWTH_WARN_ATTEMPTS: u32 = 8;
/// Growth attempts after which growth gives up.
const GROWTH_MAX_ATTEMPTS: u32 = 10_000;

mod field {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    pub const FILE_NO: usize = 8;
    pub const LENGTH: usize = 12;
    pub const UNUSED_OFS: usize = 16;
    pub const UNUSED_LEN: usize = 20;
}

/// Header at offset 0 of every data file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataFileHeader {
    /// Index of this file within its database.
    pub file_no: u32,
    /// Total capacity in bytes.
    pub file_length: u32,
    /// Start of the uncarved tail.
    pub unused_ofs: u32,
    /// Bytes left in the uncarved tail.
    pub unused_len: u32,
}

impl DataFileHeader {
    fn new(file_no: u32, file_length: u32) -> Self {
        Self {
            file_no,
            file_length,
            unused_ofs: DATA_FILE_HEADER_LEN,
            unused_len: file_length - DATA_FILE_HEADER_LEN,
        }
    }

    fn encode(&self) -> [u8; HEADER_FIELDS_LEN] {
        let mut buf = [0u8; HEADER_FIELDS_LEN];
        le::put_u32(&mut buf, field::MAGIC, DATA_FILE_MAGIC);
        le::put_u32(&mut buf, field::VERSION, DATA_FILE_VERSION);
        le::put_u32(&mut buf, field::FILE_NO, self.file_no);
        le::put_u32(&mut buf, field::LENGTH, self.file_length);
        le::put_u32(&mut buf, field::UNUSED_OFS, self.unused_ofs);
        le::put_u32(&mut buf, field::UNUSED_LEN, self.unused_len);
        buf
    }

    /// Decodes and validates a header image.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_FIELDS_LEN || le::get_u32(src, field::MAGIC) != DATA_FILE_MAGIC {
            return Err(StoreError::Corruption("data file magic mismatch"));
        }
        if le::get_u32(src, field::VERSION) != DATA_FILE_VERSION {
            return Err(StoreError::Corruption("unsupported data file version"));
        }
        let header = Self {
            file_no: le::get_u32(src, field::FILE_NO),
            file_length: le::get_u32(src, field::LENGTH),
            unused_ofs: le::get_u32(src, field::UNUSED_OFS),
            unused_len: le::get_u32(src, field::UNUSED_LEN),
        };
        let tail_end = header.unused_ofs as u64 + header.unused_len as u64;
        if header.unused_ofs < DATA_FILE_HEADER_LEN || tail_end != header.file_length as u64 {
            return Err(StoreError::Corruption("data file unused tail out of range"));
        }
        Ok(header)
    }
}

/// One numbered data file.
pub struct DataFile {
    file_no: u32,
    length: u32,
    io: Arc<dyn FileIo>,
    header: Mutex<DataFileHeader>,
}

impl DataFile {
    /// Formats `io` as data file `file_no` of `length` bytes.
    ///
    /// Existing content is discarded.
    pub fn create(file_no: u32, io: Arc<dyn FileIo>, length: u32) -> Result<Self> {
        io.truncate(0)?;
        io.truncate(length as u64)?;
        let header = DataFileHeader::new(file_no, length);
        io.write_at(0, &header.encode())?;
        Ok(Self {
            file_no,
            length,
            io,
            header: Mutex::new(header),
        })
    }

    /// Index of this file.
    pub fn file_no(&self) -> u32 {
        self.file_no
    }

    /// Capacity in bytes.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Current header, read back from the file.
    pub fn header(&self) -> Result<DataFileHeader> {
        let mut buf = [0u8; HEADER_FIELDS_LEN];
        self.io.read_at(0, &mut buf)?;
        DataFileHeader::decode(&buf)
    }

    fn span(&self, ofs: u32, len: usize) -> Result<u64> {
        let end = ofs as u64 + len as u64;
        if ofs < DATA_FILE_HEADER_LEN || end > self.length as u64 {
            return Err(StoreError::Corruption("access outside data file body"));
        }
        Ok(ofs as u64)
    }

    /// Reads `dst.len()` bytes at `ofs` within the file body.
    pub fn read(&self, ofs: u32, dst: &mut [u8]) -> Result<()> {
        let off = self.span(ofs, dst.len())?;
        self.io.read_at(off, dst)
    }

    /// Writes `src` at `ofs` within the file body.
    pub fn write(&self, ofs: u32, src: &[u8]) -> Result<()> {
        let off = self.span(ofs, src.len())?;
        self.io.write_at(off, src)
    }

    /// Takes `wanted` bytes (never fewer than `min`) from the unused tail,
    /// clamped to what is left.
    ///
    /// Returns `None` when the tail holds fewer than `min` bytes.
    fn carve(&self, wanted: u32, min: u32) -> Result<Option<(u32, u32)>> {
        let mut header = self.header.lock();
        let size = wanted.max(min).min(header.unused_len);
        if size < min {
            return Ok(None);
        }
        let ofs = header.unused_ofs;
        let next = DataFileHeader {
            unused_ofs: ofs + size,
            unused_len: header.unused_len - size,
            ..*header
        };
        self.io.write_at(0, &next.encode())?;
        *header = next;
        Ok(Some((ofs, size)))
    }

    /// Flushes the file.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }
}

/// The numbered data files of one database.
pub struct FileSet {
    db: String,
    dir: Option<PathBuf>,
    sizing: FileSizing,
    metrics: Arc<dyn StorageMetrics>,
    files: RwLock<Vec<Arc<DataFile>>>,
    growth: Mutex<()>,
}

impl FileSet {
    /// Creates an empty file set for database `db`; no file exists yet.
    pub fn new(db: &str, opts: &StoreOptions) -> Result<Self> {
        opts.validate()?;
        Ok(Self {
            db: db.to_owned(),
            dir: opts.dir.clone(),
            sizing: opts.sizing(),
            metrics: opts.metrics.clone().unwrap_or_else(default_metrics),
            files: RwLock::new(Vec::new()),
            growth: Mutex::new(()),
        })
    }

    /// Database name.
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Number of data files created so far.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Path of data file `n` when the set is file-backed.
    pub fn path(&self, n: u32) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", self.db, n)))
    }

    /// Data file `n`.
    pub fn file(&self, n: u32) -> Result<Arc<DataFile>> {
        self.files
            .read()
            .get(n as usize)
            .cloned()
            .ok_or(StoreError::Corruption("location refers to a missing data file"))
    }

    /// Creates the next data file.
    pub fn add_file(&self) -> Result<Arc<DataFile>> {
        let _growth = self.growth.lock();
        self.add_file_locked()
    }

    fn add_file_locked(&self) -> Result<Arc<DataFile>> {
        let n = self.file_count() as u32;
        let length = self.sizing.capacity(n);
        let io: Arc<dyn FileIo> = match self.path(n) {
            Some(path) => Arc::new(StdFileIo::open(path)?),
            None => Arc::new(MemFileIo::new()),
        };
        let file = Arc::new(DataFile::create(n, io, length)?);
        self.files.write().push(Arc::clone(&file));
        self.metrics.file_allocated(length);
        info!(db = %self.db, file = n, length, "datafile.new");
        Ok(file)
    }

    /// Carves a region for a new extent.
    ///
    /// Takes up to `wanted` bytes from the newest file's tail, clamped to what
    /// is left; when the tail is shorter than `min` a new file is added and the
    /// carve retried. Returns the region start and length.
    pub fn carve_extent(&self, wanted: u32, min: u32) -> Result<(DiskLoc, u32)> {
        let largest = self.sizing.max.max(self.sizing.base) - DATA_FILE_HEADER_LEN;
        if min > largest {
            return Err(StoreError::invalid(format!(
                "extent of {min} bytes exceeds the largest data file"
            )));
        }
        let _growth = self.growth.lock();
        let mut attempts = 0u32;
        loop {
            let newest = self.files.read().last().cloned();
            let file = match newest {
                Some(file) => file,
                None => self.add_file_locked()?,
            };
            if let Some((ofs, len)) = file.carve(wanted, min)? {
                debug!(db = %self.db, file = file.file_no(), ofs, len, wanted, "datafile.carve");
                return Ok((DiskLoc::new(file.file_no(), ofs), len));
            }
            attempts += 1;
            if attempts >= GROWTH_MAX_ATTEMPTS {
                return Err(StoreError::RunawayGuard("extent growth exceeded the file limit"));
            }
            if attempts > GROWTH_WARN_ATTEMPTS {
                warn!(db = %self.db, attempts, wanted, min, "datafile.growth.long_chain");
            }
            self.add_file_locked()?;
        }
    }

    /// Reads raw bytes at `loc`.
    pub fn read_bytes(&self, loc: DiskLoc, dst: &mut [u8]) -> Result<()> {
        if loc.is_null() {
            return Err(StoreError::Corruption("read through a null location"));
        }
        self.file(loc.file())?.read(loc.ofs(), dst)
    }

    /// Writes raw bytes at `loc`.
    pub fn write_bytes(&self, loc: DiskLoc, src: &[u8]) -> Result<()> {
        if loc.is_null() {
            return Err(StoreError::Corruption("write through a null location"));
        }
        self.file(loc.file())?.write(loc.ofs(), src)
    }

    /// Reads and validates the record header at `loc`.
    pub fn read_record(&self, loc: DiskLoc) -> Result<RecordHeader> {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        self.read_bytes(loc, &mut buf)?;
        RecordHeader::decode(loc, &buf)
    }

    /// Writes a record header at `loc`.
    pub fn write_record(&self, loc: DiskLoc, header: &RecordHeader) -> Result<()> {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        header.encode(&mut buf);
        self.write_bytes(loc, &buf)
    }

    /// Reads and validates the free block header at `loc`.
    pub fn read_free(&self, loc: DiskLoc) -> Result<FreeBlock> {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        self.read_bytes(loc, &mut buf)?;
        FreeBlock::decode(loc, &buf)
    }

    /// Writes a free block header at `loc`.
    pub fn write_free(&self, loc: DiskLoc, block: &FreeBlock) -> Result<()> {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        block.encode(&mut buf);
        self.write_bytes(loc, &buf)
    }

    /// Reads and validates the extent header at `loc`.
    pub fn read_extent(&self, loc: DiskLoc) -> Result<ExtentHeader> {
        let mut buf = [0u8; EXTENT_HEADER_LEN];
        self.read_bytes(loc, &mut buf)?;
        ExtentHeader::decode(loc, &buf)
    }

    /// Writes an extent header at its own location.
    pub fn write_extent(&self, header: &ExtentHeader) -> Result<()> {
        let mut buf = [0u8; EXTENT_HEADER_LEN];
        header.encode(&mut buf)?;
        self.write_bytes(header.my_loc, &buf)
    }

    /// Reads the payload bytes of the record at `loc`.
    ///
    /// The payload starts with its own little-endian `u32` length, which must
    /// fit the record's net length.
    pub fn read_payload(&self, loc: DiskLoc, header: &RecordHeader) -> Result<Vec<u8>> {
        let data = loc.advance(RECORD_HEADER_LEN as u32)?;
        let mut prefix = [0u8; 4];
        if header.net_len() < 4 {
            return Err(StoreError::CorruptRecord {
                loc,
                reason: "record too small for a payload",
            });
        }
        self.read_bytes(data, &mut prefix)?;
        let declared = u32::from_le_bytes(prefix);
        if declared < 4 || declared > header.net_len() {
            return Err(StoreError::CorruptRecord {
                loc,
                reason: "payload length exceeds record",
            });
        }
        let mut payload = vec![0u8; declared as usize];
        self.read_bytes(data, &mut payload)?;
        Ok(payload)
    }

    /// Writes payload bytes into the record at `loc`.
    pub fn write_payload(&self, loc: DiskLoc, payload: &[u8]) -> Result<()> {
        self.write_bytes(loc.advance(RECORD_HEADER_LEN as u32)?, payload)
    }

    /// Flushes every file.
    pub fn sync_all(&self) -> Result<()> {
        let files = self.files.read().clone();
        for file in files {
            file.sync()?;
        }
        Ok(())
    }
}
