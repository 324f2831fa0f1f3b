//! Chunk storage backed by Anvil region files.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chunkvault_anvil::{ChunkPos, CompressionFormat, RegionFileCache};
use chunkvault_metrics::StorageMetrics;
use fastnbt::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::StorageConfig;
use crate::{ChunkStorage, document};

/// Chunks buffered ahead of the consumer during enumeration.
const ENUMERATION_BUFFER: usize = 64;

/// Region file storage driven from a tokio runtime.
///
/// All file work runs on the runtime's blocking pool, so callers never
/// block. Each region file serializes its own operations; different
/// regions proceed in parallel.
pub struct AnvilChunkStorage {
    shared: Arc<Shared>,
    rt: Handle,
}

struct Shared {
    cache: RegionFileCache,
    compression: CompressionFormat,
    metrics: Option<Arc<StorageMetrics>>,
}

impl AnvilChunkStorage {
    pub fn new(config: &StorageConfig, rt: Handle) -> Self {
        Self::build(config, rt, None)
    }

    pub fn with_metrics(config: &StorageConfig, rt: Handle, metrics: Arc<StorageMetrics>) -> Self {
        Self::build(config, rt, Some(metrics))
    }

    fn build(config: &StorageConfig, rt: Handle, metrics: Option<Arc<StorageMetrics>>) -> Self {
        let mut cache = RegionFileCache::new(&config.region_dir, config.cache_capacity)
            .compact_on_close(config.compact_on_close);
        if let Some(metrics) = &metrics {
            cache = cache.with_metrics(metrics.clone());
        }
        log::debug!(
            "Chunk storage at {:?} (cache {}, {})",
            config.region_dir, config.cache_capacity, config.compression
        );
        Self {
            shared: Arc::new(Shared {
                cache,
                compression: config.compression,
                metrics,
            }),
            rt,
        }
    }

    pub fn compression(&self) -> CompressionFormat {
        self.shared.compression
    }

    pub fn cache(&self) -> &RegionFileCache {
        &self.shared.cache
    }

    /// Stream every stored chunk without loading them.
    ///
    /// The directory is walked lazily on the blocking pool, a few chunks
    /// ahead of the consumer. Each item can load its chunk on demand.
    pub fn enumerate(&self) -> ChunkStream {
        let (tx, rx) = mpsc::channel(ENUMERATION_BUFFER);
        let shared = self.shared.clone();
        let rt = self.rt.clone();

        self.rt.spawn_blocking(move || {
            let regions = match shared.cache.enumerate() {
                Ok(regions) => regions,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            for region in regions {
                let positions = match region.and_then(|region| region.positions()) {
                    Ok(positions) => positions,
                    Err(e) => {
                        if tx.blocking_send(Err(e)).is_err() {
                            return;
                        }
                        continue;
                    }
                };
                for pos in positions {
                    let chunk = StoredChunk {
                        pos,
                        shared: shared.clone(),
                        rt: rt.clone(),
                    };
                    if tx.blocking_send(Ok(chunk)).is_err() {
                        // Consumer went away.
                        return;
                    }
                }
            }
        });

        ChunkStream { rx }
    }

    /// Close every open region file (compaction per config, fsync).
    pub async fn close(&self) -> Result<()> {
        self.run(|shared| shared.cache.close_all()).await
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Shared) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = self.shared.clone();
        self.rt
            .spawn_blocking(move || f(&shared))
            .await
            .context("Storage task failed")?
    }
}

impl Shared {
    fn exists(&self, pos: ChunkPos) -> Result<bool> {
        match self.cache.get_if_present(pos.region())? {
            Some(region) => region.exists(pos),
            None => Ok(false),
        }
    }

    fn load(&self, pos: ChunkPos) -> Result<Option<Value>> {
        let start = Instant::now();
        let Some(region) = self.cache.get_if_present(pos.region())? else {
            return Ok(None);
        };
        let Some(reader) = region.read(pos)? else {
            return Ok(None);
        };
        drop(region);

        let format = reader.format();
        let decoded = reader
            .read_all()
            .with_context(|| format!("Failed to decompress {} stream", format))
            .and_then(|bytes| document::decode(&bytes));
        let doc = match decoded {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("Chunk {:?} is unreadable: {:?}", pos, e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_corrupt_entry();
                }
                return Ok(None);
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_load(start.elapsed());
        }
        Ok(Some(doc))
    }

    fn save(&self, pos: ChunkPos, doc: &Value) -> Result<()> {
        let start = Instant::now();
        let bytes = document::encode(pos, doc)?;
        let written = self
            .cache
            .get(pos.region())?
            .write(pos, &bytes, self.compression)
            .with_context(|| format!("Failed to save chunk {:?}", pos))?;

        log::debug!("Saved chunk {:?} ({} bytes, {} compressed)", pos, bytes.len(), written);
        if let Some(metrics) = &self.metrics {
            metrics.record_save(start.elapsed(), written);
        }
        Ok(())
    }

    fn delete(&self, pos: ChunkPos) -> Result<bool> {
        let Some(region) = self.cache.get_if_present(pos.region())? else {
            return Ok(false);
        };
        let existed = region.delete(pos)?;
        if existed {
            if let Some(metrics) = &self.metrics {
                metrics.record_delete();
            }
        }
        Ok(existed)
    }
}

#[async_trait]
impl ChunkStorage for AnvilChunkStorage {
    async fn exists(&self, pos: ChunkPos) -> Result<bool> {
        self.run(move |shared| shared.exists(pos)).await
    }

    async fn load(&self, pos: ChunkPos) -> Result<Option<Value>> {
        self.run(move |shared| shared.load(pos)).await
    }

    async fn save(&self, pos: ChunkPos, doc: &Value) -> Result<()> {
        let doc = doc.clone();
        self.run(move |shared| shared.save(pos, &doc)).await
    }

    async fn delete(&self, pos: ChunkPos) -> Result<bool> {
        self.run(move |shared| shared.delete(pos)).await
    }
}

/// Lazily produced stored chunks, see [`AnvilChunkStorage::enumerate`].
pub struct ChunkStream {
    rx: mpsc::Receiver<Result<StoredChunk>>,
}

impl ChunkStream {
    pub async fn next(&mut self) -> Option<Result<StoredChunk>> {
        self.rx.recv().await
    }
}

/// A chunk found during enumeration, loadable on demand.
pub struct StoredChunk {
    pos: ChunkPos,
    shared: Arc<Shared>,
    rt: Handle,
}

impl StoredChunk {
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Load the chunk. A chunk that vanished since it was enumerated, or
    /// whose entry cannot be decoded, is an error rather than `None`:
    /// enumeration and deletion must not overlap.
    pub async fn load(&self) -> Result<Value> {
        let pos = self.pos;
        let shared = self.shared.clone();
        self.rt
            .spawn_blocking(move || -> Result<Value> {
                match shared.load(pos)? {
                    Some(doc) => Ok(doc),
                    None if shared.exists(pos)? => {
                        anyhow::bail!("Chunk {:?} is stored but its entry is unreadable", pos)
                    }
                    None => anyhow::bail!("Chunk {:?} was enumerated but no longer exists", pos),
                }
            })
            .await
            .context("Storage task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;

    fn sample_doc(seed: i32) -> Value {
        let mut fields = HashMap::new();
        fields.insert("DataVersion".to_string(), Value::Int(4671));
        fields.insert("Status".to_string(), Value::String("minecraft:full".to_string()));
        fields.insert("Seed".to_string(), Value::Int(seed));
        fields.insert(
            "Heights".to_string(),
            Value::IntArray(fastnbt::IntArray::new((0..256).map(|i| i % 7 + seed).collect())),
        );
        Value::Compound(fields)
    }

    fn storage(dir: &TempDir) -> AnvilChunkStorage {
        AnvilChunkStorage::new(&StorageConfig::new(dir.path()), Handle::current())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let pos = ChunkPos::new(0, 0);
        let doc = sample_doc(1);

        storage.save(pos, &doc).await.unwrap();
        assert!(storage.exists(pos).await.unwrap());
        assert_eq!(storage.load(pos).await.unwrap(), Some(doc));

        let region = storage.cache().get(pos.region()).unwrap();
        assert_eq!(region.sector(pos).unwrap().start(), 2);
        drop(region);

        assert!(storage.delete(pos).await.unwrap());
        assert!(!storage.exists(pos).await.unwrap());
        assert_eq!(storage.load(pos).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_absent_chunks_create_no_files() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let pos = ChunkPos::new(100, -100);

        assert!(!storage.exists(pos).await.unwrap());
        assert_eq!(storage.load(pos).await.unwrap(), None);
        assert!(!storage.delete(pos).await.unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_coordinates_are_stamped_and_stripped() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let pos = ChunkPos::new(-7, 40);

        let Value::Compound(mut fields) = sample_doc(2) else { unreachable!() };
        fields.insert("xPos".to_string(), Value::Int(0));
        fields.insert("zPos".to_string(), Value::Int(0));
        storage.save(pos, &Value::Compound(fields)).await.unwrap();

        let region = storage.cache().get(pos.region()).unwrap();
        let raw = region.read(pos).unwrap().unwrap().read_all().unwrap();
        assert_eq!(document::stored_coords(&raw), Some(pos));
        drop(region);

        assert_eq!(storage.load(pos).await.unwrap(), Some(sample_doc(2)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overwrite_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let pos = ChunkPos::new(5, 6);

        storage.save(pos, &sample_doc(1)).await.unwrap();
        storage.save(pos, &sample_doc(2)).await.unwrap();
        storage.save(ChunkPos::new(6, 6), &sample_doc(3)).await.unwrap();

        assert_eq!(storage.load(pos).await.unwrap(), Some(sample_doc(2)));
        assert_eq!(storage.load(ChunkPos::new(6, 6)).await.unwrap(), Some(sample_doc(3)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_in_one_region() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(storage(&dir));

        let mut tasks = Vec::new();
        for i in 0..64 {
            let storage = storage.clone();
            tasks.push(tokio::spawn(async move {
                let pos = ChunkPos::new(i % 32, i / 32);
                storage.save(pos, &sample_doc(i)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for i in 0..64 {
            let pos = ChunkPos::new(i % 32, i / 32);
            assert_eq!(storage.load(pos).await.unwrap(), Some(sample_doc(i)), "chunk {:?}", pos);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enumerate_yields_every_chunk() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            cache_capacity: 2,
            ..StorageConfig::new(dir.path())
        };
        let storage = AnvilChunkStorage::new(&config, Handle::current());

        let saved: HashSet<ChunkPos> = [(0, 0), (1, 0), (31, 31), (32, 0), (-1, -1), (100, 64)]
            .into_iter()
            .map(|(x, z)| ChunkPos::new(x, z))
            .collect();
        for (i, pos) in saved.iter().enumerate() {
            storage.save(*pos, &sample_doc(i as i32)).await.unwrap();
        }

        let mut found = HashSet::new();
        let mut stream = storage.enumerate();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            chunk.load().await.unwrap();
            assert!(found.insert(chunk.pos()), "duplicate {:?}", chunk.pos());
        }
        assert_eq!(found, saved);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_vanished_chunk_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let pos = ChunkPos::new(8, 8);
        storage.save(pos, &sample_doc(0)).await.unwrap();

        let mut stream = storage.enumerate();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.pos(), pos);

        storage.delete(pos).await.unwrap();
        let err = chunk.load().await.unwrap_err();
        assert!(err.to_string().contains("no longer exists"), "{}", err);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enumerated_corrupt_chunk_reports_unreadable() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let pos = ChunkPos::new(3, 9);
        storage.save(pos, &sample_doc(0)).await.unwrap();

        let mut stream = storage.enumerate();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.pos(), pos);

        let region = storage.cache().get(pos.region()).unwrap();
        region.write(pos, b"not nbt at all", CompressionFormat::Zlib).unwrap();
        drop(region);

        let err = chunk.load().await.unwrap_err();
        assert!(err.to_string().contains("unreadable"), "{}", err);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_corrupt_payload_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let pos = ChunkPos::new(1, 2);

        let region = storage.cache().get(pos.region()).unwrap();
        region.write(pos, b"not nbt at all", CompressionFormat::Zlib).unwrap();
        drop(region);

        assert!(storage.exists(pos).await.unwrap());
        assert_eq!(storage.load(pos).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reopen_after_close() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            compression: CompressionFormat::Lz4,
            ..StorageConfig::new(dir.path())
        };
        let pos = ChunkPos::new(-40, 12);
        {
            let storage = AnvilChunkStorage::new(&config, Handle::current());
            storage.save(pos, &sample_doc(9)).await.unwrap();
            storage.close().await.unwrap();
        }
        let storage = AnvilChunkStorage::new(&config, Handle::current());
        assert_eq!(storage.load(pos).await.unwrap(), Some(sample_doc(9)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_metrics_are_recorded() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(StorageMetrics::new());
        let storage = AnvilChunkStorage::with_metrics(&StorageConfig::new(dir.path()), Handle::current(), metrics.clone());
        let pos = ChunkPos::new(0, 0);

        storage.save(pos, &sample_doc(0)).await.unwrap();
        storage.load(pos).await.unwrap();
        storage.delete(pos).await.unwrap();

        use std::sync::atomic::Ordering;
        assert_eq!(metrics.total_chunks_saved.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_chunks_loaded.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_chunks_deleted.load(Ordering::Relaxed), 1);
        assert!(metrics.total_cache_hits.load(Ordering::Relaxed) >= 2);
    }
}
