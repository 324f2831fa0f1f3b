//! Minecraft Anvil region storage (.mca).
//!
//! Region files contain 32x32 chunks in a specific binary format:
//! - Bytes 0-4095: Location table (1024 entries × 4 bytes)
//! - Bytes 4096-8191: Timestamp table (1024 entries × 4 bytes)
//! - Bytes 8192+: Chunk data (4096 byte sectors)
//!
//! Each stored chunk is `[Length: 4][Type: 1][Data...]`. Chunks needing
//! 256 or more sectors spill into a `c.<x>.<z>.mcc` file next to the region.

pub mod blocks;
pub mod cache;
pub mod compression;
pub mod pos;
pub mod region_file;
pub mod sector;

pub use cache::{RegionFileCache, RegionFiles};
pub use compression::CompressionFormat;
pub use pos::{ChunkPos, LocalPos, RegionPos};
pub use region_file::{ChunkReader, RegionFile};
pub use sector::Sector;

pub const SECTOR_BYTES: u64 = 4096; // minecraft uses 4096 bytes per sector
pub const HEADER_BYTES: u64 = 8192; // header is 8192 bytes (2 sectors 8kb)

/// Sectors occupied by the location and timestamp tables.
pub const HEADER_SECTORS: u32 = 2;

/// Number of chunks per region dimension.
pub const REGION_SIZE: i32 = 32;

/// Number of chunk slots in one region file.
pub const CHUNK_COUNT: usize = (REGION_SIZE * REGION_SIZE) as usize;

/// Entries needing this many sectors or more go to an overflow file.
pub const EXTERNAL_THRESHOLD_SECTORS: usize = 256;

/// High bit of the type byte: payload lives in the overflow file.
pub const EXTERNAL_FLAG: u8 = 0x80;

/// Bytes in front of every payload: 4 byte length + 1 byte type.
pub const ENTRY_HEADER_BYTES: usize = 5;
