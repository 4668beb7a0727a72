//! Seam between the cache and whatever loads tiles.

use std::sync::Arc;

use crate::tile::Tile;

/// Receives tiles that need loading.
///
/// The cache calls `schedule` once for each tile it creates and once for each
/// failed tile it re-queues. The tile is `Queued` at that point; the scheduler
/// owns its transitions until it reaches `Loaded` or `Error`.
///
/// Implementations must not block: fetching happens elsewhere.
pub trait TileScheduler: Send + Sync {
    fn schedule(&self, tile: Arc<Tile>);

    /// Stop loading. Tiles still in flight end as cancelled.
    fn shutdown(&self) {}
}

/// Scheduler that never loads anything. Tiles stay `Queued`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScheduler;

impl TileScheduler for NullScheduler {
    fn schedule(&self, _tile: Arc<Tile>) {}
}

/// Scheduler that completes tiles synchronously from a fixed table.
///
/// Keys missing from the table fail with a network error.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct PreloadedScheduler {
    tiles: std::collections::HashMap<crate::tile::TileKey, crate::tile::TileData>,
}

#[cfg(test)]
impl PreloadedScheduler {
    pub(crate) fn with(mut self, key: crate::tile::TileKey, data: crate::tile::TileData) -> Self {
        self.tiles.insert(key, data);
        self
    }
}

#[cfg(test)]
impl TileScheduler for PreloadedScheduler {
    fn schedule(&self, tile: Arc<Tile>) {
        if !tile.begin_loading() {
            return;
        }
        let result = match self.tiles.get(tile.key()) {
            Some(data) => Ok(data.clone()),
            None => Err(crate::tile::TileError::Network("not preloaded".to_string())),
        };
        tile.complete(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{TileKey, TileStatus};

    #[test]
    fn test_null_scheduler_leaves_tile_queued() {
        let tile = Arc::new(Tile::new(TileKey::new(0, 0, 0, "l")));
        NullScheduler.schedule(Arc::clone(&tile));
        assert_eq!(tile.status(), TileStatus::Queued);
    }
}
