//! A single on-disk region file and its overflow companions.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chunkvault_metrics::StorageMetrics;

use crate::blocks::BlockMap;
use crate::compression::CompressionFormat;
use crate::pos::{ChunkPos, LocalPos, RegionPos};
use crate::sector::Sector;
use crate::{
    CHUNK_COUNT, ENTRY_HEADER_BYTES, EXTERNAL_FLAG, EXTERNAL_THRESHOLD_SECTORS, HEADER_BYTES,
    HEADER_SECTORS, SECTOR_BYTES,
};

/// Buffered, decompressed view of one stored chunk.
pub struct ChunkReader {
    format: CompressionFormat,
    external: bool,
    inner: BufReader<Box<dyn Read>>,
}

impl ChunkReader {
    fn new(format: CompressionFormat, external: bool, compressed: Vec<u8>) -> Self {
        Self {
            format,
            external,
            inner: BufReader::new(format.decoder(Cursor::new(compressed))),
        }
    }

    pub fn format(&self) -> CompressionFormat {
        self.format
    }

    /// True when the payload came from a `.mcc` overflow file.
    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        self.inner.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// One `r.<x>.<z>.mca` file.
///
/// Every operation takes the file's own lock, so reads and writes against
/// one region never interleave. Different regions are independent.
pub struct RegionFile {
    pos: RegionPos,
    dir: PathBuf,
    path: PathBuf,
    metrics: Option<Arc<StorageMetrics>>,
    state: Mutex<RegionState>,
}

struct RegionState {
    /// `None` once the region has been closed.
    file: Option<File>,
    sectors: Vec<Sector>,
    timestamps: Vec<u32>,
    blocks: BlockMap,
}

impl RegionFile {
    /// Open the region file, creating it with an empty header if absent.
    pub fn open(dir: &Path, pos: RegionPos) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create region directory {:?}", dir))?;
        let path = dir.join(pos.file_name());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open region file {:?}", path))?;
        Self::load(dir, pos, path, file)
    }

    /// Open the region file only if it already exists on disk.
    pub fn open_existing(dir: &Path, pos: RegionPos) -> Result<Option<Self>> {
        let path = dir.join(pos.file_name());
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to open region file {:?}", path)),
        };
        Self::load(dir, pos, path, file).map(Some)
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<StorageMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    fn load(dir: &Path, pos: RegionPos, path: PathBuf, mut file: File) -> Result<Self> {
        let mut len = file.metadata()?.len();
        if len < HEADER_BYTES {
            if len > 0 {
                log::warn!("Region file {:?} has a truncated header ({} bytes), resetting it", path, len);
            }
            // A partial header cannot be trusted; start from an empty one.
            file.set_len(0)?;
            file.set_len(HEADER_BYTES)?;
            len = HEADER_BYTES;
        } else if len % SECTOR_BYTES != 0 {
            let padded = len.div_ceil(SECTOR_BYTES) * SECTOR_BYTES;
            log::warn!(
                "Region file {:?} is not sector aligned ({} bytes), padding to {}",
                path, len, padded
            );
            file.set_len(padded)?;
            len = padded;
        }

        let mut header = vec![0u8; HEADER_BYTES as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)
            .with_context(|| format!("Failed to read header of {:?}", path))?;

        let total_sectors = (len / SECTOR_BYTES) as usize;
        let mut blocks = BlockMap::new(total_sectors);
        blocks.mark_used(0..HEADER_SECTORS as usize);

        let mut sectors = vec![Sector::NONE; CHUNK_COUNT];
        let mut timestamps = vec![0u32; CHUNK_COUNT];
        for index in 0..CHUNK_COUNT {
            let sector = Sector::from_packed(read_u32(&header, index * 4));
            timestamps[index] = read_u32(&header, SECTOR_BYTES as usize + index * 4);
            if sector.is_none() {
                continue;
            }
            if sector.start() < HEADER_SECTORS || sector.count() == 0 || sector.end() as usize > total_sectors {
                log::warn!(
                    "Region {:?}: chunk slot {} points to sectors {:?} outside the file ({} sectors), ignoring it",
                    pos, index, sector.blocks(), total_sectors
                );
                continue;
            }
            if blocks.any_used(sector.blocks()) {
                log::warn!(
                    "Region {:?}: chunk slot {} overlaps sectors {:?} already claimed by another slot, ignoring it",
                    pos, index, sector.blocks()
                );
                continue;
            }
            sectors[index] = sector;
            blocks.mark_used(sector.blocks());
        }

        log::debug!("Opened region {:?} ({} sectors, {} used)", pos, total_sectors, blocks.used_count());

        Ok(Self {
            pos,
            dir: dir.to_path_buf(),
            path,
            metrics: None,
            state: Mutex::new(RegionState {
                file: Some(file),
                sectors,
                timestamps,
                blocks,
            }),
        })
    }

    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self, chunk: ChunkPos) -> Result<bool> {
        let state = self.lock()?;
        Ok(!state.sectors[self.slot(chunk)].is_none())
    }

    /// Epoch seconds of the last write or delete of this chunk's slot.
    pub fn timestamp(&self, chunk: ChunkPos) -> Result<u32> {
        let state = self.lock()?;
        Ok(state.timestamps[self.slot(chunk)])
    }

    pub fn sector(&self, chunk: ChunkPos) -> Result<Sector> {
        let state = self.lock()?;
        Ok(state.sectors[self.slot(chunk)])
    }

    /// Read and start decompressing a stored chunk.
    ///
    /// Returns `Ok(None)` when the chunk is absent or its entry is
    /// unreadable (bad type byte, truncated data, missing overflow file).
    /// Only real I/O failures are errors.
    pub fn read(&self, chunk: ChunkPos) -> Result<Option<ChunkReader>> {
        let mut state = self.lock()?;
        let sector = state.sectors[self.slot(chunk)];
        if sector.is_none() {
            return Ok(None);
        }
        let file = state.file_mut()?;

        file.seek(SeekFrom::Start(sector.byte_offset()))?;
        let mut entry_header = [0u8; ENTRY_HEADER_BYTES];
        if !read_fully(file, &mut entry_header)? {
            self.corrupt(chunk, "entry header is past the end of the file");
            return Ok(None);
        }
        let length = i32::from_be_bytes([entry_header[0], entry_header[1], entry_header[2], entry_header[3]]);
        let type_byte = entry_header[4];
        let external = type_byte & EXTERNAL_FLAG != 0;

        let Some(format) = CompressionFormat::from_id(type_byte & !EXTERNAL_FLAG) else {
            self.corrupt(chunk, &format!("unknown compression type {}", type_byte & !EXTERNAL_FLAG));
            return Ok(None);
        };
        if length < 1 {
            self.corrupt(chunk, &format!("invalid entry length {}", length));
            return Ok(None);
        }

        let compressed = if external {
            let overflow = self.overflow_path(chunk);
            match fs::read(&overflow) {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.corrupt(chunk, &format!("overflow file {:?} is missing", overflow));
                    return Ok(None);
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to read overflow file {:?}", overflow)),
            }
        } else {
            let available = sector.byte_len() - 4;
            if length as u64 > available {
                self.corrupt(
                    chunk,
                    &format!("entry length {} exceeds its {} sectors", length, sector.count()),
                );
                return Ok(None);
            }
            let mut data = vec![0u8; length as usize - 1];
            if !read_fully(file, &mut data)? {
                self.corrupt(chunk, "entry data is truncated");
                return Ok(None);
            }
            data
        };

        Ok(Some(ChunkReader::new(format, external, compressed)))
    }

    /// Compress and store `data`, replacing any previous entry.
    ///
    /// Returns the number of compressed bytes written.
    pub fn write(&self, chunk: ChunkPos, data: &[u8], format: CompressionFormat) -> Result<usize> {
        let compressed = format
            .compress(data)
            .with_context(|| format!("Failed to compress chunk {:?} with {}", chunk, format))?;
        self.write_compressed(chunk, &compressed, format)?;
        Ok(compressed.len())
    }

    /// Store an already compressed payload.
    pub fn write_compressed(&self, chunk: ChunkPos, compressed: &[u8], format: CompressionFormat) -> Result<()> {
        let mut state = self.lock()?;
        let slot = self.slot(chunk);
        let previous = state.sectors[slot];
        let overflow = self.overflow_path(chunk);
        let needed = Sector::blocks_for(compressed.len());
        let external = needed >= EXTERNAL_THRESHOLD_SECTORS;

        let sector = if external {
            write_overflow(&overflow, compressed)?;
            let start = state.blocks.first_fit(1);
            let sector = Sector::new(start as u32, 1);
            state.write_entry(sector, format.id() | EXTERNAL_FLAG, &[])?;
            if let Some(metrics) = &self.metrics {
                metrics.record_overflow_write();
            }
            log::debug!(
                "Chunk {:?} needs {} sectors, stored in overflow file {:?}",
                chunk, needed, overflow
            );
            sector
        } else {
            let start = state.blocks.first_fit(needed);
            let sector = Sector::new(start as u32, needed as u8);
            state.write_entry(sector, format.id(), compressed)?;
            sector
        };

        state.blocks.mark_used(sector.blocks());
        state.set_slot(slot, sector, now_epoch_secs())?;
        state.file_mut()?.sync_data()?;

        if !external {
            remove_if_exists(&overflow)?;
        }
        if !previous.is_none() {
            state.blocks.mark_free(previous.blocks());
        }
        Ok(())
    }

    /// Remove a stored chunk. Returns whether an entry existed.
    pub fn delete(&self, chunk: ChunkPos) -> Result<bool> {
        let mut state = self.lock()?;
        let slot = self.slot(chunk);
        let previous = state.sectors[slot];

        state.set_slot(slot, Sector::NONE, now_epoch_secs())?;
        state.file_mut()?.sync_data()?;
        remove_if_exists(&self.overflow_path(chunk))?;
        if !previous.is_none() {
            state.blocks.mark_free(previous.blocks());
        }
        Ok(!previous.is_none())
    }

    /// World positions of every stored chunk, in slot order.
    pub fn positions(&self) -> Result<Vec<ChunkPos>> {
        let state = self.lock()?;
        Ok(state
            .sectors
            .iter()
            .enumerate()
            .filter(|(_, sector)| !sector.is_none())
            .map(|(index, _)| self.pos.chunk(LocalPos::from_index(index)))
            .collect())
    }

    /// Zero every sector not referenced by the header, so stale payloads
    /// don't linger in the file.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.compact()
    }

    /// Compact (unless `fast`), sync and release the file handle.
    /// Closing twice is a no-op.
    pub fn close(&self, fast: bool) -> Result<()> {
        let mut state = self.lock()?;
        if state.file.is_none() {
            return Ok(());
        }
        if !fast {
            state.compact()?;
        }
        if let Some(file) = state.file.take() {
            file.sync_all()
                .with_context(|| format!("Failed to sync region file {:?}", self.path))?;
        }
        log::debug!("Closed region {:?}", self.pos);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|state| state.file.is_none()).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("Region {:?} lock poisoned", self.pos))
    }

    fn slot(&self, chunk: ChunkPos) -> usize {
        debug_assert_eq!(chunk.region(), self.pos, "chunk {:?} is not in region {:?}", chunk, self.pos);
        chunk.local().index()
    }

    fn overflow_path(&self, chunk: ChunkPos) -> PathBuf {
        self.dir.join(chunk.overflow_file_name())
    }

    fn corrupt(&self, chunk: ChunkPos, reason: &str) {
        log::warn!("Chunk {:?} in {:?} is unreadable: {}", chunk, self.path, reason);
        if let Some(metrics) = &self.metrics {
            metrics.record_corrupt_entry();
        }
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        if let Err(e) = self.close(true) {
            log::error!("Failed to close region {:?}: {:?}", self.pos, e);
        }
    }
}

impl RegionState {
    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Region file is closed"))
    }

    /// Write `[Length: 4][Type: 1][Data...]` at `sector`, zero padding the
    /// rest of the run. Grows the file if the run ends past it.
    fn write_entry(&mut self, sector: Sector, type_byte: u8, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(sector.byte_len() as usize);
        buf.extend_from_slice(&((payload.len() + 1) as i32).to_be_bytes());
        buf.push(type_byte);
        buf.extend_from_slice(payload);
        buf.resize(sector.byte_len() as usize, 0);

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(sector.byte_offset()))?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Update one slot in memory and in both header tables.
    fn set_slot(&mut self, slot: usize, sector: Sector, timestamp: u32) -> Result<()> {
        self.sectors[slot] = sector;
        self.timestamps[slot] = timestamp;

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start((slot * 4) as u64))?;
        file.write_all(&sector.packed().to_be_bytes())?;
        file.seek(SeekFrom::Start(SECTOR_BYTES + (slot * 4) as u64))?;
        file.write_all(&timestamp.to_be_bytes())?;
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        let runs = self.blocks.free_runs();
        if runs.is_empty() {
            return Ok(());
        }
        let zeros = vec![0u8; SECTOR_BYTES as usize];
        let file = self.file_mut()?;
        let file_sectors = file.metadata()?.len() / SECTOR_BYTES;
        for run in runs {
            file.seek(SeekFrom::Start(run.start as u64 * SECTOR_BYTES))?;
            for _ in run.start as u64..(run.end as u64).min(file_sectors) {
                file.write_all(&zeros)?;
            }
        }
        file.sync_data()?;
        Ok(())
    }
}

/// Write the overflow payload next to the region, via a temp file so a
/// crash never leaves a half written `.mcc`.
fn write_overflow(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("mcc.tmp");
    let mut file = File::create(&tmp).with_context(|| format!("Failed to create {:?}", tmp))?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {:?} into place", tmp))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {:?}", path)),
    }
}

/// `read_exact`, but a short read is reported as `false` instead of an error.
fn read_fully(file: &mut File, buf: &mut [u8]) -> io::Result<bool> {
    match file.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn now_epoch_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RegionFile {
        RegionFile::open(dir.path(), RegionPos::new(0, 0)).unwrap()
    }

    fn read(region: &RegionFile, chunk: ChunkPos) -> Option<Vec<u8>> {
        region.read(chunk).unwrap().map(|reader| reader.read_all().unwrap())
    }

    fn file_len(region: &RegionFile) -> u64 {
        fs::metadata(region.path()).unwrap().len()
    }

    #[test]
    fn test_new_file_has_empty_header() {
        let dir = TempDir::new().unwrap();
        let region = open(&dir);
        assert_eq!(file_len(&region), HEADER_BYTES);
        assert!(region.positions().unwrap().is_empty());
        assert!(!region.exists(ChunkPos::new(0, 0)).unwrap());
        assert!(region.read(ChunkPos::new(5, 5)).unwrap().is_none());
    }

    #[test]
    fn test_first_chunk_lands_after_header() {
        let dir = TempDir::new().unwrap();
        let region = open(&dir);
        let chunk = ChunkPos::new(0, 0);
        let data = vec![7u8; 300];

        region.write(chunk, &data, CompressionFormat::Zlib).unwrap();

        assert!(region.exists(chunk).unwrap());
        assert_eq!(region.sector(chunk).unwrap(), Sector::new(2, 1));
        assert_eq!(file_len(&region), 3 * SECTOR_BYTES);
        assert!(region.timestamp(chunk).unwrap() > 0);
        assert_eq!(read(&region, chunk), Some(data));

        assert!(region.delete(chunk).unwrap());
        assert!(!region.exists(chunk).unwrap());
        assert!(!region.delete(chunk).unwrap());
    }

    #[test]
    fn test_header_on_disk_matches_location_table() {
        let dir = TempDir::new().unwrap();
        let region = open(&dir);
        region.write(ChunkPos::new(1, 0), b"hello", CompressionFormat::Uncompressed).unwrap();

        let bytes = fs::read(region.path()).unwrap();
        // slot 1 -> sector 2, count 1
        assert_eq!(&bytes[4..8], &[0, 0, 2, 1]);
        // entry: length 6, type 3, payload
        let entry = &bytes[8192..8192 + 10];
        assert_eq!(entry, &[0, 0, 0, 6, 3, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let chunk = ChunkPos::new(12, 30);
        {
            let region = open(&dir);
            region.write(chunk, b"persisted", CompressionFormat::Gzip).unwrap();
            region.close(false).unwrap();
        }
        let region = open(&dir);
        assert_eq!(read(&region, chunk), Some(b"persisted".to_vec()));
        assert_eq!(region.positions().unwrap(), vec![chunk]);
    }

    #[test]
    fn test_overwrite_frees_old_sectors() {
        let dir = TempDir::new().unwrap();
        let region = open(&dir);
        let a = ChunkPos::new(0, 0);
        let b = ChunkPos::new(1, 0);
        let big = vec![1u8; 3 * 4096];

        region.write(a, &big, CompressionFormat::Uncompressed).unwrap();
        assert_eq!(region.sector(a).unwrap(), Sector::new(2, 4));

        // New copy is placed past the old one, then the old run is released.
        region.write(a, b"small", CompressionFormat::Uncompressed).unwrap();
        assert_eq!(region.sector(a).unwrap(), Sector::new(6, 1));

        region.write(b, &[2u8; 100], CompressionFormat::Uncompressed).unwrap();
        assert_eq!(region.sector(b).unwrap(), Sector::new(2, 1));

        assert_eq!(read(&region, a), Some(b"small".to_vec()));
        assert_eq!(read(&region, b), Some(vec![2u8; 100]));
    }

    #[test]
    fn test_delete_allows_reuse_without_growth() {
        let dir = TempDir::new().unwrap();
        let region = open(&dir);
        let a = ChunkPos::new(3, 3);
        let b = ChunkPos::new(4, 4);

        region.write(a, &[9u8; 10_000], CompressionFormat::Uncompressed).unwrap();
        let len = file_len(&region);
        assert!(region.delete(a).unwrap());

        region.write(b, &[8u8; 5_000], CompressionFormat::Uncompressed).unwrap();
        assert_eq!(file_len(&region), len);
        assert_eq!(region.sector(b).unwrap().start(), 2);
        assert_eq!(read(&region, a), None);
    }

    #[test]
    fn test_overflow_boundary() {
        let dir = TempDir::new().unwrap();
        let region = open(&dir);
        let inline = ChunkPos::new(0, 0);
        let external = ChunkPos::new(1, 0);

        // 255 sectors including the 5 byte entry header: stays inline.
        let just_fits = vec![3u8; 255 * 4096 - 5];
        region.write(inline, &just_fits, CompressionFormat::Uncompressed).unwrap();
        assert_eq!(region.sector(inline).unwrap(), Sector::new(2, 255));
        assert!(!dir.path().join(inline.overflow_file_name()).exists());

        // One more byte needs 256 sectors: goes to c.1.0.mcc.
        let too_big = vec![4u8; 255 * 4096 - 4];
        region.write(external, &too_big, CompressionFormat::Uncompressed).unwrap();
        assert_eq!(region.sector(external).unwrap(), Sector::new(257, 1));
        let overflow = dir.path().join(external.overflow_file_name());
        assert_eq!(fs::metadata(&overflow).unwrap().len(), too_big.len() as u64);

        let reader = region.read(external).unwrap().unwrap();
        assert!(reader.is_external());
        assert_eq!(reader.read_all().unwrap(), too_big);
        assert_eq!(read(&region, inline), Some(just_fits));

        // Shrinking back inline removes the stale overflow file.
        region.write(external, b"tiny", CompressionFormat::Uncompressed).unwrap();
        assert!(!overflow.exists());
        assert_eq!(read(&region, external), Some(b"tiny".to_vec()));
    }

    #[test]
    fn test_missing_overflow_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let region = open(&dir);
        let chunk = ChunkPos::new(2, 2);
        region.write(chunk, &vec![0u8; 256 * 4096], CompressionFormat::Uncompressed).unwrap();

        fs::remove_file(dir.path().join(chunk.overflow_file_name())).unwrap();
        assert!(region.exists(chunk).unwrap());
        assert!(region.read(chunk).unwrap().is_none());
    }

    #[test]
    fn test_unknown_compression_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let chunk = ChunkPos::new(0, 0);
        {
            let region = open(&dir);
            region.write(chunk, b"payload", CompressionFormat::Zlib).unwrap();
        }
        let path = dir.path().join("r.0.0.mca");
        let mut bytes = fs::read(&path).unwrap();
        bytes[8192 + 4] = 42;
        fs::write(&path, bytes).unwrap();

        let region = open(&dir);
        assert!(region.exists(chunk).unwrap());
        assert!(region.read(chunk).unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let chunk = ChunkPos::new(0, 0);
        {
            let region = open(&dir);
            region.write(chunk, b"payload", CompressionFormat::Uncompressed).unwrap();
        }
        let path = dir.path().join("r.0.0.mca");
        let mut bytes = fs::read(&path).unwrap();
        bytes[8192..8196].copy_from_slice(&100_000i32.to_be_bytes());
        fs::write(&path, bytes).unwrap();

        let region = open(&dir);
        assert!(region.read(chunk).unwrap().is_none());
    }

    #[test]
    fn test_misaligned_file_is_padded() {
        let dir = TempDir::new().unwrap();
        let chunk = ChunkPos::new(0, 0);
        {
            let region = open(&dir);
            region.write(chunk, b"payload", CompressionFormat::Uncompressed).unwrap();
        }
        let path = dir.path().join("r.0.0.mca");
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0u8; 100]);
        fs::write(&path, bytes).unwrap();

        let region = open(&dir);
        assert_eq!(file_len(&region) % SECTOR_BYTES, 0);
        assert_eq!(read(&region, chunk), Some(b"payload".to_vec()));
    }

    #[test]
    fn test_sector_past_end_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.0.0.mca");
        let mut bytes = vec![0u8; HEADER_BYTES as usize];
        bytes[0..4].copy_from_slice(&Sector::new(40, 2).packed().to_be_bytes());
        fs::write(&path, bytes).unwrap();

        let region = open(&dir);
        assert!(!region.exists(ChunkPos::new(0, 0)).unwrap());
        region.write(ChunkPos::new(1, 0), b"x", CompressionFormat::Uncompressed).unwrap();
        assert_eq!(region.sector(ChunkPos::new(1, 0)).unwrap(), Sector::new(2, 1));
    }

    #[test]
    fn test_overlapping_slots_keep_first_claim() {
        let dir = TempDir::new().unwrap();
        let a = ChunkPos::new(0, 0);
        let b = ChunkPos::new(1, 0);
        {
            let region = open(&dir);
            region.write(a, b"AAAA", CompressionFormat::Uncompressed).unwrap();
        }
        let path = dir.path().join("r.0.0.mca");
        let mut bytes = fs::read(&path).unwrap();
        bytes.copy_within(0..4, 4);
        fs::write(&path, bytes).unwrap();

        let region = open(&dir);
        assert_eq!(read(&region, a), Some(b"AAAA".to_vec()));
        assert!(!region.exists(b).unwrap());

        region.delete(a).unwrap();
        region.write(ChunkPos::new(2, 0), b"CCCC", CompressionFormat::Uncompressed).unwrap();
        assert_eq!(read(&region, b), None);
    }

    #[test]
    fn test_compact_zeroes_free_sectors() {
        let dir = TempDir::new().unwrap();
        let region = open(&dir);
        let a = ChunkPos::new(0, 0);
        let b = ChunkPos::new(1, 0);
        region.write(a, &[0xEEu8; 2000], CompressionFormat::Uncompressed).unwrap();
        region.write(b, &[0xDDu8; 2000], CompressionFormat::Uncompressed).unwrap();
        region.delete(a).unwrap();

        region.close(false).unwrap();
        assert!(region.is_closed());
        assert!(region.read(b).is_err());

        let bytes = fs::read(dir.path().join("r.0.0.mca")).unwrap();
        assert!(bytes[8192..12288].iter().all(|&byte| byte == 0));
        assert_eq!(bytes[12288 + 5], 0xDD);
    }

    #[test]
    fn test_open_existing_does_not_create() {
        let dir = TempDir::new().unwrap();
        let missing = RegionFile::open_existing(dir.path(), RegionPos::new(4, 4)).unwrap();
        assert!(missing.is_none());
        assert!(!dir.path().join("r.4.4.mca").exists());
    }

    #[test]
    fn test_negative_region_positions() {
        let dir = TempDir::new().unwrap();
        let region = RegionFile::open(dir.path(), RegionPos::new(-1, -1)).unwrap();
        let chunk = ChunkPos::new(-1, -32);
        region.write(chunk, b"neg", CompressionFormat::Lz4).unwrap();
        assert_eq!(region.positions().unwrap(), vec![chunk]);
        assert_eq!(read(&region, chunk), Some(b"neg".to_vec()));
    }
}
