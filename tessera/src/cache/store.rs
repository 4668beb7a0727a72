//! The tile cache.
//!
//! Owns the mapping `TileKey → Tile`. A key maps to at most one tile, and a
//! tile is handed to the scheduler exactly once per `Queued` state, so there
//! is never more than one fetch in flight per key.
//!
//! Evicting a tile mid-fetch only marks it for discard. Until that fetch
//! ends the key is *draining*: a replacement tile created meanwhile waits
//! in `Queued` and is handed to the scheduler once the old tile is disposed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::TileScheduler;
use crate::telemetry::EngineMetrics;
use crate::tile::{Tile, TileKey, TileStatus};

/// Default maximum number of cached tiles.
pub const DEFAULT_MAX_TILES: usize = 512;

/// Default decoded byte budget (256 MiB).
pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024;

/// Default cool-down before a failed tile is fetched again.
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(5);

/// Default ceiling for the doubling cool-down.
pub const DEFAULT_RETRY_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Cache limits and retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of tiles kept; 0 disables the count limit.
    pub max_tiles: usize,
    /// Maximum decoded bytes kept; 0 disables the byte limit.
    pub max_bytes: usize,
    pub retry_cooldown: Duration,
    pub retry_backoff_max: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_tiles: DEFAULT_MAX_TILES,
            max_bytes: DEFAULT_MAX_BYTES,
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            retry_backoff_max: DEFAULT_RETRY_BACKOFF_MAX,
        }
    }
}

impl CacheConfig {
    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_retry(mut self, cooldown: Duration, backoff_max: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self.retry_backoff_max = backoff_max.max(cooldown);
        self
    }

    /// Cool-down after `failures` consecutive failures: the base cool-down
    /// doubled per extra failure, capped at `retry_backoff_max`.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(20);
        self.retry_cooldown
            .saturating_mul(1u32 << doublings)
            .min(self.retry_backoff_max.max(self.retry_cooldown))
    }
}

/// What one reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Keys that got a new tile.
    pub requested: Vec<TileKey>,
    /// Failed tiles put back in the queue after their cool-down.
    pub requeued: Vec<TileKey>,
    /// Tiles removed to respect the limits.
    pub evicted: Vec<TileKey>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.requested.is_empty() && self.requeued.is_empty() && self.evicted.is_empty()
    }
}

/// Tile counts per status plus decoded bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub queued: usize,
    pub loading: usize,
    pub loaded: usize,
    pub errored: usize,
    pub bytes: usize,
}

/// An evicted tile whose fetch is still running.
struct Draining {
    tile: Arc<Tile>,
    successor: Option<Arc<Tile>>,
}

type DrainingMap = DashMap<TileKey, Draining>;

/// Mapping from key to tile with LRU eviction and fetch deduplication.
pub struct TileCache {
    tiles: DashMap<TileKey, Arc<Tile>>,
    draining: Arc<DrainingMap>,
    scheduler: Arc<dyn TileScheduler>,
    config: CacheConfig,
    tick: AtomicU64,
    completions_tx: mpsc::UnboundedSender<TileKey>,
    completions_rx: Mutex<mpsc::UnboundedReceiver<TileKey>>,
    metrics: Arc<EngineMetrics>,
}

impl TileCache {
    pub fn new(scheduler: Arc<dyn TileScheduler>, config: CacheConfig) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            tiles: DashMap::new(),
            draining: Arc::new(DashMap::new()),
            scheduler,
            config,
            tick: AtomicU64::new(0),
            completions_tx,
            completions_rx: Mutex::new(completions_rx),
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Share a metrics instance, typically with the fetch pipeline.
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn scheduler(&self) -> &Arc<dyn TileScheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, key: &TileKey) -> Option<Arc<Tile>> {
        self.tiles.get(key).map(|t| Arc::clone(t.value()))
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key)
    }

    /// Evicted tiles whose fetch has not finished yet.
    pub fn draining_count(&self) -> usize {
        self.draining.len()
    }

    /// Existing tile for `key` in any status, or a new `Queued` tile handed
    /// to the scheduler.
    ///
    /// Concurrent callers for the same key receive the same tile; only the
    /// caller that created it schedules the fetch. A new tile for a draining
    /// key stays `Queued` until the evicted fetch ends.
    pub fn request_tile(&self, key: &TileKey) -> Arc<Tile> {
        let tick = self.next_tick();
        let (tile, created) = self.get_or_create(key);
        tile.touch(tick);
        self.metrics.tile_requested(created.is_none());

        if created == Some(Created::Ready) {
            trace!(tile = %key, "Scheduling new tile");
            self.scheduler.schedule(Arc::clone(&tile));
        }
        tile
    }

    /// Bring the cache in line with the keys the view needs.
    ///
    /// Missing keys are requested, failed tiles past their cool-down are
    /// re-queued, and tiles that are neither needed nor held are evicted
    /// least recently used first until both limits hold.
    pub fn reconcile(&self, needed: &HashSet<TileKey>) -> ReconcileOutcome {
        let tick = self.next_tick();
        let now = Instant::now();
        let mut outcome = ReconcileOutcome::default();

        for key in needed {
            let (tile, created) = self.get_or_create(key);
            tile.touch(tick);
            if let Some(created) = created {
                self.metrics.tile_requested(false);
                if created == Created::Ready {
                    self.scheduler.schedule(Arc::clone(&tile));
                }
                outcome.requested.push(key.clone());
            } else if self.retry_due(&tile, now) && tile.requeue() {
                debug!(tile = %key, attempts = tile.attempts(), "Re-queueing failed tile");
                self.metrics.tile_requeued();
                self.scheduler.schedule(Arc::clone(&tile));
                outcome.requeued.push(key.clone());
            }
        }

        outcome.evicted = self.evict_over_budget(needed);
        if !outcome.evicted.is_empty() {
            debug!(
                evicted = outcome.evicted.len(),
                remaining = self.tiles.len(),
                "Evicted tiles"
            );
        }
        outcome
    }

    /// Forcibly evict every tile whose key matches. Returns how many were
    /// removed.
    pub fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(&TileKey) -> bool,
    {
        let keys: Vec<TileKey> = self
            .tiles
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.evict(&key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.metrics.tiles_evicted(removed);
            info!(removed, "Invalidated tiles");
        }
        removed
    }

    /// Re-queue a failed tile now, ignoring its cool-down. Returns false if
    /// the key is unknown or not in the `Error` state.
    pub fn retry(&self, key: &TileKey) -> bool {
        let Some(tile) = self.get(key) else {
            return false;
        };
        if !tile.requeue() {
            return false;
        }
        debug!(tile = %key, "Explicit retry");
        self.metrics.tile_requeued();
        self.scheduler.schedule(tile);
        true
    }

    /// Keys whose tiles finished loading or failed since the last call.
    pub fn poll_completions(&self) -> HashSet<TileKey> {
        let mut rx = self.completions_rx.lock();
        let mut changed = HashSet::new();
        while let Ok(key) = rx.try_recv() {
            changed.insert(key);
        }
        changed
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for entry in self.tiles.iter() {
            let tile = entry.value();
            stats.total += 1;
            match tile.status() {
                TileStatus::Queued => stats.queued += 1,
                TileStatus::Loading => stats.loading += 1,
                TileStatus::Loaded => stats.loaded += 1,
                TileStatus::Error(_) => stats.errored += 1,
                TileStatus::Disposed => {}
            }
            stats.bytes += tile.byte_size();
        }
        stats
    }

    /// Dispose and drop every tile.
    pub fn clear(&self) -> usize {
        self.invalidate(|_| true)
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn get_or_create(&self, key: &TileKey) -> (Arc<Tile>, Option<Created>) {
        match self.tiles.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), None),
            Entry::Vacant(entry) => {
                let tile = Arc::new(Tile::new(key.clone()));
                let tx = self.completions_tx.clone();
                tile.subscribe(move |key, status| {
                    if matches!(status, TileStatus::Loaded | TileStatus::Error(_)) {
                        let _ = tx.send(key.clone());
                    }
                });
                let created = match self.draining.get_mut(key) {
                    Some(mut draining) => {
                        debug!(tile = %key, "Deferring fetch until evicted tile drains");
                        draining.successor = Some(Arc::clone(&tile));
                        Created::Deferred
                    }
                    None => Created::Ready,
                };
                entry.insert(Arc::clone(&tile));
                (tile, Some(created))
            }
        }
    }

    /// Remove and dispose the tile for `key`.
    ///
    /// A tile caught mid-fetch is recorded as draining before it leaves the
    /// map, so no replacement can be scheduled until its fetch ends.
    fn evict(&self, key: &TileKey) -> Option<Arc<Tile>> {
        let tile = match self.tiles.entry(key.clone()) {
            Entry::Occupied(entry) => {
                if entry.get().status() == TileStatus::Loading {
                    self.draining.insert(
                        key.clone(),
                        Draining {
                            tile: Arc::clone(entry.get()),
                            successor: None,
                        },
                    );
                }
                entry.remove()
            }
            Entry::Vacant(_) => return None,
        };
        tile.dispose();

        let owned = self
            .draining
            .get(key)
            .is_some_and(|d| Arc::ptr_eq(&d.tile, &tile));
        if owned {
            let draining = Arc::clone(&self.draining);
            let scheduler = Arc::clone(&self.scheduler);
            let old = Arc::downgrade(&tile);
            tile.subscribe(move |key, status| {
                if *status == TileStatus::Disposed {
                    if let Some(old) = old.upgrade() {
                        finish_draining(&draining, scheduler.as_ref(), key, &old);
                    }
                }
            });
            // The fetch may have ended before the listener was in place
            if tile.status() == TileStatus::Disposed {
                finish_draining(&self.draining, self.scheduler.as_ref(), key, &tile);
            }
        }
        Some(tile)
    }

    fn retry_due(&self, tile: &Tile, now: Instant) -> bool {
        match tile.failure() {
            Some((error, failures, failed_at)) if error.is_retryable() => {
                now.saturating_duration_since(failed_at) >= self.config.retry_delay(failures)
            }
            _ => false,
        }
    }

    fn evict_over_budget(&self, needed: &HashSet<TileKey>) -> Vec<TileKey> {
        let mut count = self.tiles.len();
        let mut bytes: usize = self.tiles.iter().map(|e| e.value().byte_size()).sum();
        if !self.over_budget(count, bytes) {
            return Vec::new();
        }

        let mut candidates: Vec<(u64, TileKey, usize)> = self
            .tiles
            .iter()
            .filter(|e| !needed.contains(e.key()) && e.value().holder_count() == 0)
            .map(|e| (e.value().last_used(), e.key().clone(), e.value().byte_size()))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut evicted = Vec::new();
        for (_, key, size) in candidates {
            if !self.over_budget(count, bytes) {
                break;
            }
            if self.evict(&key).is_some() {
                count -= 1;
                bytes = bytes.saturating_sub(size);
                evicted.push(key);
            }
        }
        self.metrics.tiles_evicted(evicted.len());
        evicted
    }

    fn over_budget(&self, count: usize, bytes: usize) -> bool {
        (self.config.max_tiles > 0 && count > self.config.max_tiles)
            || (self.config.max_bytes > 0 && bytes > self.config.max_bytes)
    }
}

/// Whether a newly created tile may be scheduled now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Created {
    Ready,
    Deferred,
}

/// End the draining period for `key` if `old` still owns it, scheduling any
/// replacement that was requested meanwhile.
fn finish_draining(
    draining: &DrainingMap,
    scheduler: &dyn TileScheduler,
    key: &TileKey,
    old: &Arc<Tile>,
) {
    let Some((_, entry)) = draining.remove_if(key, |_, d| Arc::ptr_eq(&d.tile, old)) else {
        return;
    };
    if let Some(successor) = entry.successor.filter(|t| t.status() == TileStatus::Queued) {
        debug!(tile = %key, "Evicted tile drained; scheduling replacement");
        scheduler.schedule(successor);
    }
}
