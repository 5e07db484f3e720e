use crate::primitives::bytes::le;
use crate::types::{DiskLoc, Result, StoreError, NULL_OFS};

/// Bytes of header in front of every record and free block.
pub const RECORD_HEADER_LEN: usize = 16;

mod field {
    pub const LEN: usize = 0;
    pub const EXTENT_OFS: usize = 4;
    pub const NEXT_OFS: usize = 8;
    pub const PREV_OFS: usize = 12;
    pub const NEXT_FREE: usize = 8;
}

/// Header of a live record.
///
/// Chain pointers are offsets inside the record's own file; a record never
/// links to a record in another file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordHeader {
    /// Total length including this header.
    pub len: u32,
    /// Offset of the owning extent's header.
    pub extent_ofs: u32,
    /// Offset of the next record in the extent chain, or [`NULL_OFS`].
    pub next_ofs: u32,
    /// Offset of the previous record in the extent chain, or [`NULL_OFS`].
    pub prev_ofs: u32,
}

impl RecordHeader {
    /// Usable payload capacity.
    pub fn net_len(&self) -> u32 {
        self.len.saturating_sub(RECORD_HEADER_LEN as u32)
    }

    /// Encodes into `dst[..RECORD_HEADER_LEN]`.
    pub fn encode(&self, dst: &mut [u8]) {
        le::put_u32(dst, field::LEN, self.len);
        le::put_u32(dst, field::EXTENT_OFS, self.extent_ofs);
        le::put_u32(dst, field::NEXT_OFS, self.next_ofs);
        le::put_u32(dst, field::PREV_OFS, self.prev_ofs);
    }

    /// Decodes and validates a header read at `loc`.
    pub fn decode(loc: DiskLoc, src: &[u8]) -> Result<Self> {
        let header = Self {
            len: le::get_u32(src, field::LEN),
            extent_ofs: le::get_u32(src, field::EXTENT_OFS),
            next_ofs: le::get_u32(src, field::NEXT_OFS),
            prev_ofs: le::get_u32(src, field::PREV_OFS),
        };
        if (header.len as usize) < RECORD_HEADER_LEN {
            return Err(StoreError::CorruptRecord {
                loc,
                reason: "record length smaller than header",
            });
        }
        if header.extent_ofs >= loc.ofs() {
            return Err(StoreError::CorruptRecord {
                loc,
                reason: "record precedes its extent",
            });
        }
        Ok(header)
    }

    /// Location of the next record in the chain, or null.
    pub fn next(&self, at: DiskLoc) -> DiskLoc {
        at.with_ofs(self.next_ofs)
    }

    /// Location of the previous record in the chain, or null.
    pub fn prev(&self, at: DiskLoc) -> DiskLoc {
        at.with_ofs(self.prev_ofs)
    }

    /// Location of the owning extent.
    pub fn extent(&self, at: DiskLoc) -> DiskLoc {
        DiskLoc::new(at.file(), self.extent_ofs)
    }

    /// Reinterprets this record's space as a free block heading `next_free`.
    pub fn into_free(self, next_free: DiskLoc) -> FreeBlock {
        FreeBlock {
            len: self.len,
            extent_ofs: self.extent_ofs,
            next_free,
        }
    }
}

/// Header of a reclaimed region linked into a free-list bucket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FreeBlock {
    /// Total length including the header.
    pub len: u32,
    /// Offset of the owning extent's header.
    pub extent_ofs: u32,
    /// Next block in the same bucket, or null.
    pub next_free: DiskLoc,
}

impl FreeBlock {
    /// Encodes into `dst[..RECORD_HEADER_LEN]`.
    pub fn encode(&self, dst: &mut [u8]) {
        le::put_u32(dst, field::LEN, self.len);
        le::put_u32(dst, field::EXTENT_OFS, self.extent_ofs);
        self.next_free.encode(&mut dst[field::NEXT_FREE..]);
    }

    /// Decodes and validates a free block read at `loc`.
    pub fn decode(loc: DiskLoc, src: &[u8]) -> Result<Self> {
        let block = Self {
            len: le::get_u32(src, field::LEN),
            extent_ofs: le::get_u32(src, field::EXTENT_OFS),
            next_free: DiskLoc::decode(&src[field::NEXT_FREE..]),
        };
        if (block.len as usize) < RECORD_HEADER_LEN || block.len % 4 != 0 {
            return Err(StoreError::Corruption("free block length invalid"));
        }
        if block.extent_ofs >= loc.ofs() {
            return Err(StoreError::Corruption("free block precedes its extent"));
        }
        Ok(block)
    }

    /// Reinterprets this free space as a record with no chain neighbours.
    pub fn into_record(self) -> RecordHeader {
        RecordHeader {
            len: self.len,
            extent_ofs: self.extent_ofs,
            next_ofs: NULL_OFS,
            prev_ofs: NULL_OFS,
        }
    }
}
