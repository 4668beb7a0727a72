//! Tile caching.
//!
//! - [`TileCache`] - in-memory mapping from key to tile with LRU eviction,
//!   fetch deduplication and retry cool-downs
//! - [`DiskTileStore`] - optional on-disk store of raw tile bytes
//! - [`TileScheduler`] - the seam through which the cache hands tiles to a
//!   loader such as [`FetchPipeline`](crate::fetch::FetchPipeline)

mod disk;
mod store;
mod traits;

pub use disk::{clear_disk_store, disk_store_stats, DiskStoreError, DiskStoreStats, DiskTileStore};
pub use store::{
    CacheConfig, CacheStats, ReconcileOutcome, TileCache, DEFAULT_MAX_BYTES, DEFAULT_MAX_TILES,
    DEFAULT_RETRY_BACKOFF_MAX, DEFAULT_RETRY_COOLDOWN,
};
pub use traits::{NullScheduler, TileScheduler};

#[cfg(test)]
pub(crate) use traits::PreloadedScheduler;
