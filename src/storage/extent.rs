use crate::primitives::bytes::le;
use crate::types::{DiskLoc, Result, StoreError};

/// Tag at the front of every extent header.
pub const EXTENT_MAGIC: u32 = 0x4142_4344;

/// Maximum namespace length stored in an extent header (excluding the terminator).
pub const MAX_NS_LEN: usize = 127;

/// Bytes reserved for the extent header; the record body starts right after.
pub const EXTENT_HEADER_LEN: usize = 176;

const MAX_EXTENT_SIZE: u64 = 1_000_000_000;
const GROWTH_THROTTLE: u32 = 4_000_000;

mod field {
    use core::ops::Range;

    pub const MAGIC: usize = 0;
    pub const MY_LOC: usize = 4;
    pub const NEXT: usize = 12;
    pub const PREV: usize = 20;
    pub const NS: Range<usize> = 28..156;
    pub const LENGTH: usize = 156;
    pub const FIRST_RECORD: usize = 160;
    pub const LAST_RECORD: usize = 168;
}

/// Header of an extent: a contiguous region of one data file holding one
/// collection's record chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtentHeader {
    /// Location of this header.
    pub my_loc: DiskLoc,
    /// Next extent of the same collection.
    pub xnext: DiskLoc,
    /// Previous extent of the same collection.
    pub xprev: DiskLoc,
    /// Owning namespace.
    pub ns: String,
    /// Total length including this header.
    pub length: u32,
    /// Head of the record chain; null iff the extent holds no live records.
    pub first_record: DiskLoc,
    /// Tail of the record chain; null iff the extent holds no live records.
    pub last_record: DiskLoc,
}

impl ExtentHeader {
    /// Fresh header for an empty extent.
    pub fn new(my_loc: DiskLoc, ns: &str, length: u32) -> Self {
        Self {
            my_loc,
            xnext: DiskLoc::NULL,
            xprev: DiskLoc::NULL,
            ns: ns.to_owned(),
            length,
            first_record: DiskLoc::NULL,
            last_record: DiskLoc::NULL,
        }
    }

    /// Location of the first byte after the header.
    pub fn body_loc(&self) -> Result<DiskLoc> {
        self.my_loc.advance(EXTENT_HEADER_LEN as u32)
    }

    /// Bytes available to records and free blocks.
    pub fn body_len(&self) -> u32 {
        self.length - EXTENT_HEADER_LEN as u32
    }

    /// Returns true when no live record is chained into this extent.
    pub fn is_empty(&self) -> bool {
        self.first_record.is_null()
    }

    /// Encodes into `dst[..EXTENT_HEADER_LEN]`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if self.ns.len() > MAX_NS_LEN {
            return Err(StoreError::invalid("namespace too long for extent header"));
        }
        le::put_u32(dst, field::MAGIC, EXTENT_MAGIC);
        self.my_loc.encode(&mut dst[field::MY_LOC..]);
        self.xnext.encode(&mut dst[field::NEXT..]);
        self.xprev.encode(&mut dst[field::PREV..]);
        let ns = &mut dst[field::NS];
        ns.fill(0);
        ns[..self.ns.len()].copy_from_slice(self.ns.as_bytes());
        le::put_u32(dst, field::LENGTH, self.length);
        self.first_record.encode(&mut dst[field::FIRST_RECORD..]);
        self.last_record.encode(&mut dst[field::LAST_RECORD..]);
        Ok(())
    }

    /// Decodes the header read at `at`, checking the magic tag and self location.
    pub fn decode(at: DiskLoc, src: &[u8]) -> Result<Self> {
        if le::get_u32(src, field::MAGIC) != EXTENT_MAGIC {
            return Err(StoreError::Corruption("extent magic mismatch"));
        }
        let my_loc = DiskLoc::decode(&src[field::MY_LOC..]);
        if my_loc != at {
            return Err(StoreError::Corruption("extent self location mismatch"));
        }
        let raw_ns = &src[field::NS];
        let end = raw_ns.iter().position(|&b| b == 0).unwrap_or(raw_ns.len());
        let ns = std::str::from_utf8(&raw_ns[..end])
            .map_err(|_| StoreError::Corruption("extent namespace not utf-8"))?
            .to_owned();
        let length = le::get_u32(src, field::LENGTH);
        if (length as usize) <= EXTENT_HEADER_LEN {
            return Err(StoreError::Corruption("extent length smaller than header"));
        }
        Ok(Self {
            my_loc,
            xnext: DiskLoc::decode(&src[field::NEXT..]),
            xprev: DiskLoc::decode(&src[field::PREV..]),
            ns,
            length,
            first_record: DiskLoc::decode(&src[field::FIRST_RECORD..]),
            last_record: DiskLoc::decode(&src[field::LAST_RECORD..]),
        })
    }
}

fn floor_to_256(sz: u64, record_len: u32) -> Result<u32> {
    let floored = (sz.min(u32::MAX as u64) as u32) & 0xffff_ff00;
    if floored <= record_len {
        return Err(StoreError::invalid(format!(
            "record of {record_len} bytes does not fit any extent"
        )));
    }
    Ok(floored)
}

/// Size of the first extent for a collection whose first record is `record_len` bytes.
///
/// Small records get 64x headroom, larger ones 16x, capped near 1 GB and
/// floored to a 256-byte boundary.
pub fn initial_extent_size(record_len: u32) -> Result<u32> {
    let len = record_len as u64;
    let sz = if record_len < 1000 { len * 64 } else { len * 16 };
    floor_to_256(sz.min(MAX_EXTENT_SIZE), record_len)
}

/// Size of the next extent once `last_extent_size` has been outgrown.
pub fn followup_extent_size(record_len: u32, last_extent_size: u32) -> Result<u32> {
    let initial = initial_extent_size(record_len)? as u64;
    let grown = if last_extent_size < GROWTH_THROTTLE {
        last_extent_size as u64 * 4
    } else {
        (last_extent_size as f64 * 1.2) as u64
    };
    floor_to_256(initial.max(grown), record_len)
}
