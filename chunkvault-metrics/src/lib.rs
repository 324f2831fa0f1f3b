use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct StorageMetrics {
    // Storage Stats
    pub total_chunks_loaded: AtomicUsize,
    pub total_load_time_us: AtomicU64,
    pub max_load_time_us: AtomicU64,
    pub total_chunks_saved: AtomicUsize,
    pub total_save_time_us: AtomicU64,
    pub max_save_time_us: AtomicU64,
    pub total_chunks_deleted: AtomicUsize,
    pub total_bytes_written: AtomicU64,

    // Entries that failed framing, codec or NBT checks
    pub total_corrupt_entries: AtomicUsize,
    pub total_overflow_writes: AtomicUsize,

    // Region cache
    pub total_cache_hits: AtomicUsize,
    pub total_cache_misses: AtomicUsize,
    pub total_cache_evictions: AtomicUsize,

    // Session
    pub start_time: Option<Instant>,
}

impl StorageMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_load(&self, duration: Duration) {
        self.total_chunks_loaded.fetch_add(1, Ordering::Relaxed);
        let us = duration.as_micros() as u64;
        self.total_load_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_load_time_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_save(&self, duration: Duration, compressed_bytes: usize) {
        self.total_chunks_saved.fetch_add(1, Ordering::Relaxed);
        let us = duration.as_micros() as u64;
        self.total_save_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_save_time_us.fetch_max(us, Ordering::Relaxed);
        self.total_bytes_written.fetch_add(compressed_bytes as u64, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.total_chunks_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_entry(&self) {
        self.total_corrupt_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_write(&self) {
        self.total_overflow_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.total_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.total_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_eviction(&self) {
        self.total_cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.start_time.unwrap_or_else(Instant::now).elapsed();

        let loaded = self.total_chunks_loaded.load(Ordering::Relaxed);
        let load_time = self.total_load_time_us.load(Ordering::Relaxed) as f64 / 1000.0; // ms
        let load_max = self.max_load_time_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let load_avg = if loaded > 0 { load_time / loaded as f64 } else { 0.0 };

        let saved = self.total_chunks_saved.load(Ordering::Relaxed);
        let save_time = self.total_save_time_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let save_max = self.max_save_time_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let save_avg = if saved > 0 { save_time / saved as f64 } else { 0.0 };
        let written_kb = self.total_bytes_written.load(Ordering::Relaxed) as f64 / 1024.0;
        let overflow = self.total_overflow_writes.load(Ordering::Relaxed);

        let deleted = self.total_chunks_deleted.load(Ordering::Relaxed);
        let corrupt = self.total_corrupt_entries.load(Ordering::Relaxed);

        let hits = self.total_cache_hits.load(Ordering::Relaxed);
        let misses = self.total_cache_misses.load(Ordering::Relaxed);
        let evictions = self.total_cache_evictions.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 { (hits as f64 / total_requests as f64) * 100.0 } else { 0.0 };

        format!(
            "Chunkvault Storage Report\n\
             =========================\n\
             Session Duration: {:.2?}\n\n\
             [Read]\n\
             Chunks Loaded: {}\n\
             Avg Time: {:.2} ms/chunk\n\
             Max Time: {:.2} ms\n\
             Corrupt Entries: {}\n\n\
             [Write]\n\
             Chunks Saved: {}\n\
             Avg Time: {:.2} ms/chunk\n\
             Max Time: {:.2} ms\n\
             Compressed Written: {:.1} KiB\n\
             Overflow Files: {}\n\
             Chunks Deleted: {}\n\n\
             [Region Cache]\n\
             Hits: {}\n\
             Misses: {}\n\
             Evictions: {}\n\
             Hit Rate: {:.1}%\n",
            uptime,
            loaded, load_avg, load_max, corrupt,
            saved, save_avg, save_max, written_kb, overflow, deleted,
            hits, misses, evictions, hit_rate
        )
    }
}
