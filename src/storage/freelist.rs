//! Bucketed free list for one collection.
//!
//! Free blocks are intrusive: each block's header carries the link to the next
//! block of its bucket, so reclaiming space never allocates. The bucket heads
//! live in [`FreeList`], which is owned by the collection's metadata.

use smallvec::SmallVec;
use tracing::trace;

use super::datafile::FileSet;
use super::record::{FreeBlock, RecordHeader};
use crate::types::{DiskLoc, Result, StoreError};

/// Upper bounds of the size classes, doubling from 32 bytes to 8 MiB.
pub const BUCKET_SIZES: [u32; 19] = [
    32, 64, 128, 256, 0x200, 0x400, 0x800, 0x1000, 0x2000, 0x4000, 0x8000, 0x10000, 0x20000,
    0x40000, 0x80000, 0x100000, 0x200000, 0x400000, 0x800000,
];

/// Number of buckets: one per size class plus an overflow bucket.
pub const BUCKETS: usize = BUCKET_SIZES.len() + 1;

const MAX_BUCKET: usize = BUCKETS - 1;

/// Smallest remainder worth splitting off as its own free block.
pub const MIN_SPLIT_LEN: u32 = 24;

/// Candidates examined after the first fit, looking for a tighter one.
const EXTRA_CANDIDATES: u32 = 5;

/// Chain length after which a bucket with no fit is abandoned.
const MAX_CHAIN_WITHOUT_FIT: u32 = 30;

/// Total blocks one search may visit before the list is declared cyclic.
const MAX_VISITS: u64 = 1 << 24;

/// Index of the first size class that is `>= len`, saturating at the overflow bucket.
pub fn bucket(len: u32) -> usize {
    BUCKET_SIZES
        .iter()
        .position(|&class| class >= len)
        .unwrap_or(MAX_BUCKET)
}

/// Rounds a requested length up to the 4-byte allocation quantum.
pub fn quantize(len: u32) -> Result<u32> {
    len.checked_add(3)
        .map(|l| l & !3)
        .ok_or_else(|| StoreError::invalid("allocation length overflow"))
}

/// Space handed out by [`FreeList::alloc`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Allocation {
    /// Start of the granted region (its header).
    pub loc: DiskLoc,
    /// Granted length including the header; may exceed the request.
    pub len: u32,
    /// Offset of the owning extent.
    pub extent_ofs: u32,
}

#[derive(Clone, Copy, Debug)]
enum Link {
    Head(usize),
    Block(DiskLoc),
}

/// Bucket heads of a collection's free list.
#[derive(Clone, Debug)]
pub struct FreeList {
    heads: [DiskLoc; BUCKETS],
}

impl Default for FreeList {
    fn default() -> Self {
        Self {
            heads: [DiskLoc::NULL; BUCKETS],
        }
    }
}

impl FreeList {
    /// Head of bucket `b`.
    pub fn head(&self, b: usize) -> DiskLoc {
        self.heads[b]
    }

    /// Links a free block at `loc` into the bucket for its length.
    ///
    /// Buckets are LIFO: the most recently freed block is reused first.
    pub fn add(&mut self, files: &FileSet, loc: DiskLoc, block: FreeBlock) -> Result<()> {
        let b = bucket(block.len);
        let linked = FreeBlock {
            next_free: self.heads[b],
            ..block
        };
        files.write_free(loc, &linked)?;
        self.heads[b] = loc;
        trace!(loc = %loc, len = block.len, bucket = b, "freelist.add");
        Ok(())
    }

    /// Turns the record at `loc` into a free block.
    pub fn free(&mut self, files: &FileSet, loc: DiskLoc, header: RecordHeader) -> Result<()> {
        self.add(files, loc, header.into_free(DiskLoc::NULL))
    }

    /// Carves `len_with_header` bytes (rounded to 4) out of the free list.
    ///
    /// Returns [`StoreError::OutOfSpace`] when no bucket holds a large enough block.
    pub fn alloc(&mut self, files: &FileSet, len_with_header: u32, capped: bool) -> Result<Allocation> {
        let len = quantize(len_with_header)?;
        let Some((loc, block)) = self.take_best_fit(files, len)? else {
            return Err(StoreError::OutOfSpace);
        };

        let left = block.len - len;
        if left < MIN_SPLIT_LEN || (!capped && left < len >> 3) {
            trace!(loc = %loc, granted = block.len, wanted = len, "freelist.alloc.whole");
            return Ok(Allocation {
                loc,
                len: block.len,
                extent_ofs: block.extent_ofs,
            });
        }

        let front = FreeBlock {
            len,
            extent_ofs: block.extent_ofs,
            next_free: DiskLoc::NULL,
        };
        files.write_free(loc, &front)?;
        let rest = FreeBlock {
            len: left,
            extent_ofs: block.extent_ofs,
            next_free: DiskLoc::NULL,
        };
        self.add(files, loc.advance(len)?, rest)?;
        trace!(loc = %loc, granted = len, remainder = left, "freelist.alloc.split");
        Ok(Allocation {
            loc,
            len,
            extent_ofs: block.extent_ofs,
        })
    }

    /// Bounded best-fit search starting at the bucket for `len`; unlinks the winner.
    fn take_best_fit(&mut self, files: &FileSet, len: u32) -> Result<Option<(DiskLoc, FreeBlock)>> {
        let mut b = bucket(len);
        let mut prev = Link::Head(b);
        let mut cur = self.heads[b];
        let mut best: Option<(Link, DiskLoc, FreeBlock)> = None;
        let mut extra = EXTRA_CANDIDATES;
        let mut chain = 0u32;
        let mut visits = 0u64;

        loop {
            if cur.is_null() {
                if best.is_some() {
                    break;
                }
                b += 1;
                if b > MAX_BUCKET {
                    return Ok(None);
                }
                prev = Link::Head(b);
                cur = self.heads[b];
                chain = 0;
                continue;
            }

            visits += 1;
            if visits > MAX_VISITS {
                return Err(StoreError::Corruption("free list chain does not terminate"));
            }
            let block = files.read_free(cur)?;
            let fits = block.len >= len;
            match best {
                Some((_, _, current)) => {
                    if fits && block.len < current.len {
                        best = Some((prev, cur, block));
                    }
                    extra -= 1;
                    if extra == 0 {
                        break;
                    }
                }
                None if fits => best = Some((prev, cur, block)),
                None => {}
            }

            chain += 1;
            if best.is_none() && chain > MAX_CHAIN_WITHOUT_FIT && b < MAX_BUCKET {
                trace!(bucket = b, chain, "freelist.search.abandon_bucket");
                cur = DiskLoc::NULL;
                continue;
            }
            prev = Link::Block(cur);
            cur = block.next_free;
        }

        let Some((link, loc, block)) = best else {
            return Ok(None);
        };
        self.relink(files, link, block.next_free)?;
        Ok(Some((loc, block)))
    }

    fn relink(&mut self, files: &FileSet, link: Link, next: DiskLoc) -> Result<()> {
        match link {
            Link::Head(b) => self.heads[b] = next,
            Link::Block(at) => {
                let mut block = files.read_free(at)?;
                block.next_free = next;
                files.write_free(at, &block)?;
            }
        }
        Ok(())
    }

    /// Visits every free block, bucket by bucket, in chain order.
    pub fn walk(
        &self,
        files: &FileSet,
        mut f: impl FnMut(usize, DiskLoc, &FreeBlock) -> Result<()>,
    ) -> Result<()> {
        let mut visits = 0u64;
        for (b, &head) in self.heads.iter().enumerate() {
            let mut cur = head;
            while !cur.is_null() {
                visits += 1;
                if visits > MAX_VISITS {
                    return Err(StoreError::Corruption("free list chain does not terminate"));
                }
                let block = files.read_free(cur)?;
                f(b, cur, &block)?;
                cur = block.next_free;
            }
        }
        Ok(())
    }

    /// Merges byte-adjacent free blocks of the same file.
    ///
    /// Drains every bucket, sorts the blocks by location, coalesces runs and
    /// relinks the survivors. Total free bytes are unchanged. Returns the
    /// number of fragments after compaction.
    pub fn compact(&mut self, files: &FileSet) -> Result<usize> {
        let mut blocks: Vec<(DiskLoc, FreeBlock)> = Vec::new();
        self.walk(files, |_, loc, block| {
            blocks.push((loc, *block));
            Ok(())
        })?;
        let before = blocks.len();
        self.heads = [DiskLoc::NULL; BUCKETS];
        if blocks.is_empty() {
            return Ok(0);
        }
        blocks.sort_by_key(|(loc, _)| *loc);

        let mut merged: SmallVec<[(DiskLoc, FreeBlock); 4]> = SmallVec::new();
        for (loc, block) in blocks {
            if let Some((last_loc, last)) = merged.last_mut() {
                let adjacent = last_loc.file() == loc.file()
                    && last_loc.ofs() as u64 + last.len as u64 == loc.ofs() as u64;
                if adjacent {
                    last.len += block.len;
                    continue;
                }
            }
            merged.push((loc, block));
        }

        let after = merged.len();
        for (loc, block) in merged {
            self.add(files, loc, block)?;
        }
        trace!(before, after, "freelist.compact");
        Ok(after)
    }
}
