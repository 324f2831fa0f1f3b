//! Location table entries.

use std::ops::Range;

use crate::{ENTRY_HEADER_BYTES, SECTOR_BYTES};

/// A run of sectors inside a region file.
///
/// Stored on disk as `[Offset:3 bytes][Count:1 byte]` (big endian), i.e.
/// `start << 8 | count`. `Sector::NONE` marks an empty slot.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub struct Sector {
    start: u32,
    count: u8,
}

impl Sector {
    pub const NONE: Sector = Sector { start: 0, count: 0 };

    /// Largest sector index that fits in the 3 byte offset field.
    pub const MAX_START: u32 = 0x00FF_FFFF;

    pub fn new(start: u32, count: u8) -> Self {
        debug_assert!(start <= Self::MAX_START);
        Self { start, count }
    }

    #[inline]
    pub fn from_packed(packed: u32) -> Self {
        Self {
            start: packed >> 8,
            count: (packed & 0xFF) as u8,
        }
    }

    #[inline]
    pub fn packed(self) -> u32 {
        (self.start << 8) | self.count as u32
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn start(self) -> u32 {
        self.start
    }

    pub fn count(self) -> u8 {
        self.count
    }

    /// One past the last sector of the run.
    pub fn end(self) -> u32 {
        self.start + self.count as u32
    }

    pub fn blocks(self) -> Range<usize> {
        self.start as usize..self.end() as usize
    }

    /// File offset of the first byte of the run.
    pub fn byte_offset(self) -> u64 {
        self.start as u64 * SECTOR_BYTES
    }

    pub fn byte_len(self) -> u64 {
        self.count as u64 * SECTOR_BYTES
    }

    /// Sectors needed to hold a payload of `payload_len` bytes plus its
    /// 5 byte entry header.
    #[inline]
    pub fn blocks_for(payload_len: usize) -> usize {
        (payload_len + ENTRY_HEADER_BYTES).div_ceil(SECTOR_BYTES as usize)
    }
}
