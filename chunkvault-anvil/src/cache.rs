//! Bounded pool of open region files.

use std::collections::{HashMap, HashSet};
use std::fs::{self, ReadDir};
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chunkvault_metrics::StorageMetrics;
use lru::LruCache;

use crate::pos::RegionPos;
use crate::region_file::RegionFile;

pub const DEFAULT_CAPACITY: usize = 256;

/// Keeps recently used region files open, keyed by region position.
///
/// Get-or-create happens under one lock, so a region is never opened twice.
/// When the pool grows past its capacity the least recently used region
/// that nobody else holds is removed and closed after the pool lock is
/// released. Reopening a region whose close is still pending waits for it.
/// Regions held by in-flight operations are never evicted, so the pool can
/// overshoot its capacity while every entry is busy.
pub struct RegionFileCache {
    dir: PathBuf,
    capacity: NonZeroUsize,
    compact_on_close: bool,
    metrics: Option<Arc<StorageMetrics>>,
    regions: Mutex<LruCache<RegionPos, Arc<RegionFile>>>,
    closing: Mutex<HashMap<RegionPos, Arc<RegionFile>>>,
}

type Evicted = Vec<(RegionPos, Arc<RegionFile>)>;

impl RegionFileCache {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir: dir.into(),
            capacity: cap,
            compact_on_close: true,
            metrics: None,
            regions: Mutex::new(LruCache::unbounded()),
            closing: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether evicted regions are compacted before they are closed.
    pub fn compact_on_close(mut self, compact: bool) -> Self {
        self.compact_on_close = compact;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|regions| regions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the region file, opening (and creating) it if needed.
    pub fn get(&self, pos: RegionPos) -> Result<Arc<RegionFile>> {
        let (region, evicted) = {
            let mut regions = self.lock()?;
            if let Some(region) = regions.get(&pos) {
                self.record_hit();
                return Ok(region.clone());
            }
            self.record_miss();
            self.wait_for_close(pos)?;
            let region = RegionFile::open(&self.dir, pos)?.with_metrics(self.metrics.clone());
            self.insert(&mut regions, pos, region)?
        };
        self.close_evicted(evicted);
        Ok(region)
    }

    /// Get the region file only if it is cached or already exists on disk.
    /// Never creates a file.
    pub fn get_if_present(&self, pos: RegionPos) -> Result<Option<Arc<RegionFile>>> {
        let (region, evicted) = {
            let mut regions = self.lock()?;
            if let Some(region) = regions.get(&pos) {
                self.record_hit();
                return Ok(Some(region.clone()));
            }
            self.wait_for_close(pos)?;
            let Some(region) = RegionFile::open_existing(&self.dir, pos)? else {
                return Ok(None);
            };
            self.record_miss();
            let region = region.with_metrics(self.metrics.clone());
            self.insert(&mut regions, pos, region)?
        };
        self.close_evicted(evicted);
        Ok(Some(region))
    }

    /// Walk the storage directory for region files. Each call re-reads the
    /// directory; files are opened one at a time as the iterator advances.
    pub fn enumerate(&self) -> Result<RegionFiles<'_>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e).with_context(|| format!("Failed to list {:?}", self.dir)),
        };
        Ok(RegionFiles {
            cache: self,
            entries,
            seen: HashSet::new(),
        })
    }

    /// Close and drop every cached region (shutdown sweep).
    pub fn close_all(&self) -> Result<()> {
        let mut regions = self.lock()?;
        let mut first_error = None;
        while let Some((pos, region)) = regions.pop_lru() {
            if let Err(e) = region.close(!self.compact_on_close) {
                log::error!("Failed to close region {:?}: {:?}", pos, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Add a freshly opened region and pick eviction victims. The victims
    /// are registered as closing; the caller closes them once the pool lock
    /// is released.
    fn insert(
        &self,
        regions: &mut LruCache<RegionPos, Arc<RegionFile>>,
        pos: RegionPos,
        region: RegionFile,
    ) -> Result<(Arc<RegionFile>, Evicted)> {
        let region = Arc::new(region);
        regions.put(pos, region.clone());

        let mut evicted = Vec::new();
        while regions.len() > self.capacity.get() {
            // A strong count of 1 means only the pool holds it, and new
            // handles are only handed out under the pool lock.
            let victim = regions
                .iter()
                .rev()
                .find(|(_, region)| Arc::strong_count(region) == 1)
                .map(|(pos, _)| *pos);
            let Some(victim) = victim else {
                log::debug!("All {} cached regions are in use, deferring eviction", regions.len());
                break;
            };
            if let Some(victim_region) = regions.pop(&victim) {
                self.lock_closing()?.insert(victim, victim_region.clone());
                evicted.push((victim, victim_region));
            }
        }
        Ok((region, evicted))
    }

    fn close_evicted(&self, evicted: Evicted) {
        for (pos, region) in evicted {
            log::debug!("Evicting region {:?}", pos);
            if let Err(e) = region.close(!self.compact_on_close) {
                log::error!("Failed to close evicted region {:?}: {:?}", pos, e);
            }
            if let Ok(mut closing) = self.lock_closing() {
                if closing.get(&pos).is_some_and(|pending| Arc::ptr_eq(pending, &region)) {
                    closing.remove(&pos);
                }
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_eviction();
            }
        }
    }

    /// Finish closing an evicted handle for `pos` before its file is
    /// opened again. Closing is idempotent, so whichever side gets the
    /// region lock first does the work.
    fn wait_for_close(&self, pos: RegionPos) -> Result<()> {
        let pending = self.lock_closing()?.get(&pos).cloned();
        if let Some(region) = pending {
            log::debug!("Region {:?} is still closing, waiting before reopening", pos);
            region.close(!self.compact_on_close)?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<RegionPos, Arc<RegionFile>>>> {
        self.regions
            .lock()
            .map_err(|_| anyhow::anyhow!("Region cache lock poisoned"))
    }

    fn lock_closing(&self) -> Result<MutexGuard<'_, HashMap<RegionPos, Arc<RegionFile>>>> {
        self.closing
            .lock()
            .map_err(|_| anyhow::anyhow!("Region close list lock poisoned"))
    }

    fn record_hit(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_hit();
        }
    }

    fn record_miss(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss();
        }
    }
}

impl Drop for RegionFileCache {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            log::error!("Failed to close region cache for {:?}: {:?}", self.dir, e);
        }
    }
}

/// Lazy walk over the region files of a directory.
///
/// Legacy `r.<x>.<z>.<y>.mca` names resolve to the `r.<x>.<z>.mca` region
/// and are skipped when that file does not exist.
pub struct RegionFiles<'a> {
    cache: &'a RegionFileCache,
    entries: Option<ReadDir>,
    seen: HashSet<RegionPos>,
}

impl Iterator for RegionFiles<'_> {
    type Item = Result<Arc<RegionFile>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e).context("Failed to read region directory entry")),
            };
            let name = entry.file_name();
            let Some((pos, legacy)) = name.to_str().and_then(RegionPos::from_file_name) else {
                continue;
            };
            if !self.seen.insert(pos) {
                continue;
            }
            match self.cache.get_if_present(pos) {
                Ok(Some(region)) => return Some(Ok(region)),
                Ok(None) => {
                    if legacy {
                        log::debug!("Legacy region file {:?} has no {} counterpart, skipping", name, pos.file_name());
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
