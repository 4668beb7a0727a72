//! Lock-free atomic metrics collection.

use super::TelemetrySnapshot;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by the cache and the fetch pipeline.
///
/// All operations use `Relaxed` ordering; the counters are independent
/// measurements and are only read through [`EngineMetrics::snapshot`].
pub struct EngineMetrics {
    start_time: Instant,

    // === Cache ===
    tile_requests: AtomicU64,
    tile_requests_coalesced: AtomicU64,
    tiles_evicted: AtomicU64,
    tiles_requeued: AtomicU64,

    // === Fetch ===
    fetches_started: AtomicU64,
    fetches_succeeded: AtomicU64,
    fetches_failed: AtomicU64,
    fetches_cancelled: AtomicU64,
    fetches_active: AtomicUsize,
    bytes_downloaded: AtomicU64,

    // === Disk store ===
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,

    // === Timing (microseconds) ===
    download_time_us: AtomicU64,
    decode_time_us: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            tile_requests: AtomicU64::new(0),
            tile_requests_coalesced: AtomicU64::new(0),
            tiles_evicted: AtomicU64::new(0),
            tiles_requeued: AtomicU64::new(0),
            fetches_started: AtomicU64::new(0),
            fetches_succeeded: AtomicU64::new(0),
            fetches_failed: AtomicU64::new(0),
            fetches_cancelled: AtomicU64::new(0),
            fetches_active: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            disk_misses: AtomicU64::new(0),
            download_time_us: AtomicU64::new(0),
            decode_time_us: AtomicU64::new(0),
        }
    }

    // === Cache tracking ===

    /// Record a tile request; `coalesced` when it joined an existing tile.
    pub fn tile_requested(&self, coalesced: bool) {
        self.tile_requests.fetch_add(1, Ordering::Relaxed);
        if coalesced {
            self.tile_requests_coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn tiles_evicted(&self, count: usize) {
        self.tiles_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn tile_requeued(&self) {
        self.tiles_requeued.fetch_add(1, Ordering::Relaxed);
    }

    // === Fetch tracking ===

    pub fn fetch_started(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
        self.fetches_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_succeeded(&self) {
        self.fetches_succeeded.fetch_add(1, Ordering::Relaxed);
        self.fetches_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn fetch_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
        self.fetches_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn fetch_cancelled(&self) {
        self.fetches_cancelled.fetch_add(1, Ordering::Relaxed);
        self.fetches_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a completed download and how long it took.
    pub fn bytes_downloaded(&self, bytes: usize, elapsed: Duration) {
        self.bytes_downloaded
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.download_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn decode_time(&self, elapsed: Duration) {
        self.decode_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    // === Disk store tracking ===

    pub fn disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Fetches currently in flight.
    pub fn active_fetches(&self) -> usize {
        self.fetches_active.load(Ordering::Relaxed)
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let uptime = self.start_time.elapsed();
        let bytes_downloaded = self.bytes_downloaded.load(Ordering::Relaxed);
        let secs = uptime.as_secs_f64();
        let bytes_per_second = if secs > 0.0 {
            bytes_downloaded as f64 / secs
        } else {
            0.0
        };

        TelemetrySnapshot {
            uptime,
            tile_requests: self.tile_requests.load(Ordering::Relaxed),
            tile_requests_coalesced: self.tile_requests_coalesced.load(Ordering::Relaxed),
            tiles_evicted: self.tiles_evicted.load(Ordering::Relaxed),
            tiles_requeued: self.tiles_requeued.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            fetches_cancelled: self.fetches_cancelled.load(Ordering::Relaxed),
            fetches_active: self.fetches_active.load(Ordering::Relaxed),
            bytes_downloaded,
            bytes_per_second,
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.disk_misses.load(Ordering::Relaxed),
            total_download_time_ms: self.download_time_us.load(Ordering::Relaxed) / 1000,
            total_decode_time_ms: self.decode_time_us.load(Ordering::Relaxed) / 1000,
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
