//! Chunk, region and in-region coordinates.

use crate::REGION_SIZE;

const LOCAL_MASK: i32 = REGION_SIZE - 1;
const REGION_SHIFT: u32 = 5;

/// Coordinates for a chunk column in the world.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region file that stores this chunk.
    #[inline]
    pub fn region(&self) -> RegionPos {
        RegionPos::new(self.x >> REGION_SHIFT, self.z >> REGION_SHIFT)
    }

    /// Slot of this chunk inside its region (0-31 on each axis).
    #[inline]
    pub fn local(&self) -> LocalPos {
        LocalPos::new((self.x & LOCAL_MASK) as u8, (self.z & LOCAL_MASK) as u8)
    }

    /// Name of the overflow file holding an oversized payload for this chunk.
    pub fn overflow_file_name(&self) -> String {
        format!("c.{}.{}.mcc", self.x, self.z)
    }
}

/// Region file coordinates (parsed from filename like "r.0.-1.mca").
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn file_name(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Parse region position from filename.
    ///
    /// Accepts "r.<x>.<z>.mca" and the legacy cubic "r.<x>.<z>.<y>.mca".
    /// The flag is true when the legacy form matched.
    pub fn from_file_name(name: &str) -> Option<(Self, bool)> {
        let parts: Vec<&str> = name.split('.').collect();
        let legacy = match parts.len() {
            4 => false,
            5 => true,
            _ => return None,
        };
        if parts[0] != "r" || parts[parts.len() - 1] != "mca" {
            return None;
        }
        let x = parts[1].parse().ok()?;
        let z = parts[2].parse().ok()?;
        if legacy {
            parts[3].parse::<i32>().ok()?;
        }
        Some((Self { x, z }, legacy))
    }

    /// Convert a local slot back to world chunk coordinates.
    pub fn chunk(&self, local: LocalPos) -> ChunkPos {
        ChunkPos::new(
            (self.x << REGION_SHIFT) | local.x as i32,
            (self.z << REGION_SHIFT) | local.z as i32,
        )
    }
}

/// Chunk coordinates relative to the owning region.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct LocalPos {
    pub x: u8,
    pub z: u8,
}

impl LocalPos {
    pub fn new(x: u8, z: u8) -> Self {
        debug_assert!((x as i32) < REGION_SIZE && (z as i32) < REGION_SIZE);
        Self { x, z }
    }

    /// Linear index into the header tables (0-1023).
    #[inline]
    pub fn index(&self) -> usize {
        self.x as usize + self.z as usize * REGION_SIZE as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Self {
        let x = (index % REGION_SIZE as usize) as u8;
        let z = (index / REGION_SIZE as usize) as u8;
        Self::new(x, z)
    }
}
