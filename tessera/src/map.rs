//! The map handle: view, cache, overlays and one render backend.
//!
//! There is no global map instance. A [`MapContext`] is created explicitly
//! and passed to whoever drives frames.
//!
//! ```text
//! set_view / update_view ──► dirty
//!                              │
//! frame() ──► needed keys ──► TileCache::reconcile ──► scheduler
//!        ──► poll_completions ─┐
//!        ──► redraw if dirty or a needed tile changed
//!                 draw + draw_elements
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::cache::{ReconcileOutcome, TileCache, TileScheduler};
use crate::drawer::{DrawContext, DrawStats, DrawerError, Ray, RaycastHit, RenderBackend};
use crate::overlay::Overlays;
use crate::tile::{TileKey, TileStatus};
use crate::view::ViewState;

/// Distance along a screen ray used by [`MapContext::hit_test`].
const SCREEN_RAY_LENGTH: f64 = 2.0;

/// What one call to [`MapContext::frame`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub requested: usize,
    pub requeued: usize,
    pub evicted: usize,
    /// Needed tiles that finished since the previous frame.
    pub completed: usize,
    /// Needed tiles not yet loaded or failed.
    pub pending: usize,
    /// Whether the backend was redrawn.
    pub redrawn: bool,
    pub draw: DrawStats,
    pub elements: usize,
}

impl FrameReport {
    /// Every needed tile has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.pending == 0
    }
}

/// Explicit handle to one map.
///
/// The caller drives it: mutate the view, call [`frame`](Self::frame)
/// whenever the view changes or periodically while tiles are loading.
pub struct MapContext<B: RenderBackend> {
    view: ViewState,
    cache: Arc<TileCache>,
    layers: Vec<String>,
    overlays: Overlays,
    backend: B,
    dirty: bool,
    drawn_overlay_revision: Option<u64>,
    disposed: bool,
}

impl<B: RenderBackend> MapContext<B> {
    /// Create a map over `cache` drawing `layers` bottom first.
    pub fn new(view: ViewState, cache: Arc<TileCache>, layers: Vec<String>, backend: B) -> Self {
        Self {
            view,
            cache,
            layers,
            overlays: Overlays::new(),
            backend,
            dirty: true,
            drawn_overlay_revision: None,
            disposed: false,
        }
    }

    pub fn with_overlays(mut self, overlays: Overlays) -> Self {
        self.overlays = overlays;
        self
    }

    /// Initialize the backend at the view's size.
    pub fn initialize(&mut self) -> Result<(), DrawerError> {
        self.backend
            .initialize(self.view.width(), self.view.height())?;
        info!(
            backend = self.backend.name(),
            width = self.view.width(),
            height = self.view.height(),
            layers = ?self.layers,
            "Map initialized"
        );
        self.dirty = true;
        Ok(())
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Replace the view; the next frame reconciles and redraws.
    pub fn set_view(&mut self, view: ViewState) {
        if view != self.view {
            self.view = view;
            self.dirty = true;
        }
    }

    pub fn update_view<F>(&mut self, f: F)
    where
        F: FnOnce(&ViewState) -> ViewState,
    {
        let next = f(&self.view);
        self.set_view(next);
    }

    /// Force the next frame to redraw.
    pub fn request_redraw(&mut self) {
        self.dirty = true;
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn overlays(&self) -> &Overlays {
        &self.overlays
    }

    pub fn overlays_mut(&mut self) -> &mut Overlays {
        &mut self.overlays
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Keys of every layer needed for the current view.
    pub fn needed_keys(&self) -> HashSet<TileKey> {
        self.layers
            .iter()
            .flat_map(|layer| self.view.needed_keys(layer))
            .collect()
    }

    /// Needed tiles that are not yet loaded or failed.
    pub fn pending_tiles(&self) -> usize {
        self.pending_in(&self.needed_keys())
    }

    /// Every needed tile is loaded or has failed.
    pub fn is_covered(&self) -> bool {
        self.pending_tiles() == 0
    }

    /// Run one frame: reconcile the cache with the view and redraw if
    /// anything visible changed.
    ///
    /// Tile failures never surface here; failed tiles draw as empty.
    pub fn frame(&mut self) -> Result<FrameReport, DrawerError> {
        if self.disposed {
            return Err(DrawerError::Disposed);
        }

        let needed = self.needed_keys();
        let ReconcileOutcome {
            requested,
            requeued,
            evicted,
        } = self.cache.reconcile(&needed);
        let completed = self
            .cache
            .poll_completions()
            .iter()
            .filter(|key| needed.contains(*key))
            .count();

        let mut report = FrameReport {
            requested: requested.len(),
            requeued: requeued.len(),
            evicted: evicted.len(),
            completed,
            pending: self.pending_in(&needed),
            ..FrameReport::default()
        };

        let overlays_changed = self.drawn_overlay_revision != Some(self.overlays.revision());
        if self.dirty || completed > 0 || overlays_changed {
            let ctx = DrawContext {
                view: &self.view,
                cache: &self.cache,
                layers: &self.layers,
                overlays: &self.overlays,
            };
            report.draw = self.backend.draw(&ctx)?;
            report.elements = self.backend.draw_elements(&ctx)?;
            report.redrawn = true;
            self.dirty = false;
            self.drawn_overlay_revision = Some(self.overlays.revision());
            debug!(
                drawn = report.draw.tiles_drawn,
                missing = report.draw.tiles_missing,
                pending = report.pending,
                elements = report.elements,
                "Frame redrawn"
            );
        } else {
            trace!(pending = report.pending, "Frame unchanged");
        }
        Ok(report)
    }

    /// Cast `ray` against the drawn map.
    pub fn raycast(&self, ray: &Ray, max_distance: f64) -> Result<Option<RaycastHit>, DrawerError> {
        let ctx = DrawContext {
            view: &self.view,
            cache: &self.cache,
            layers: &self.layers,
            overlays: &self.overlays,
        };
        self.backend.raycast(&ctx, ray, max_distance)
    }

    /// Raycast straight down at a screen pixel.
    pub fn hit_test(&self, px: f64, py: f64) -> Result<Option<RaycastHit>, DrawerError> {
        self.raycast(&Ray::from_screen(px, py), SCREEN_RAY_LENGTH)
    }

    /// Release the backend. Idempotent.
    ///
    /// A cache shared with other maps is left running. When this map holds
    /// the only reference, the scheduler is stopped and every tile released.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.backend.dispose();
        if Arc::strong_count(&self.cache) == 1 {
            self.cache.scheduler().shutdown();
            let released = self.cache.clear();
            info!(released, "Map disposed with its cache");
        } else {
            info!("Map disposed; cache still shared");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn pending_in(&self, needed: &HashSet<TileKey>) -> usize {
        needed
            .iter()
            .filter(|key| {
                !self.cache.get(key).is_some_and(|tile| {
                    matches!(tile.status(), TileStatus::Loaded | TileStatus::Error(_))
                })
            })
            .count()
    }
}

impl<B: RenderBackend> Drop for MapContext<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, NullScheduler, PreloadedScheduler};
    use crate::coord::TilePoint;
    use crate::drawer::{DrawerState, PixelBackend, VectorBackend};
    use crate::overlay::{ElementKind, Marker};
    use crate::tile::TileData;
    use image::{Rgba, RgbaImage};

    fn world_view() -> ViewState {
        ViewState::new(TilePoint::new(1.0, 1.0), 1, 512, 512)
    }

    fn loaded_everywhere(zoom: u8) -> PreloadedScheduler {
        let n = 1u32 << zoom;
        let mut scheduler = PreloadedScheduler::default();
        for x in 0..n {
            for y in 0..n {
                scheduler = scheduler.with(
                    TileKey::new(x, y, zoom, "osm"),
                    TileData::Raster(RgbaImage::from_pixel(256, 256, Rgba([0, 128, 0, 255]))),
                );
            }
        }
        scheduler
    }

    fn map_with<B: RenderBackend>(scheduler: PreloadedScheduler, backend: B) -> MapContext<B> {
        let cache = Arc::new(TileCache::new(Arc::new(scheduler), CacheConfig::default()));
        MapContext::new(world_view(), cache, vec!["osm".to_string()], backend)
    }

    #[test]
    fn test_frame_requests_and_draws() {
        let mut map = map_with(loaded_everywhere(1), PixelBackend::new());
        map.initialize().unwrap();

        let report = map.frame().unwrap();
        assert_eq!(report.requested, 4);
        assert_eq!(report.pending, 0);
        assert!(report.redrawn);
        assert_eq!(report.draw.tiles_drawn, 8);
        assert!(map.is_covered());
        assert_eq!(map.backend().pixel(300, 300), Some([0, 128, 0, 255]));

        let second = map.frame().unwrap();
        assert_eq!(second.requested, 0);
        assert!(!second.redrawn);

        map.request_redraw();
        assert!(map.frame().unwrap().redrawn);
    }

    #[test]
    fn test_view_change_triggers_redraw_and_eviction() {
        let scheduler = loaded_everywhere(1);
        let cache = Arc::new(TileCache::new(
            Arc::new(scheduler),
            CacheConfig::default().with_max_tiles(4),
        ));
        let mut map = MapContext::new(
            world_view(),
            cache,
            vec!["osm".to_string()],
            VectorBackend::new(),
        );
        map.initialize().unwrap();
        map.frame().unwrap();
        map.frame().unwrap();

        map.update_view(|v| v.set_zoom(3));
        let report = map.frame().unwrap();
        assert!(report.redrawn);
        assert!(report.requested > 0);
        assert!(report.evicted >= 4);
        // Zoom 3 tiles were never preloaded, so they fail and count as settled
        assert_eq!(report.pending, 0);
    }

    #[test]
    fn test_pending_tiles_while_queued() {
        let cache = Arc::new(TileCache::new(Arc::new(NullScheduler), CacheConfig::default()));
        let mut map = MapContext::new(
            world_view(),
            cache,
            vec!["osm".to_string()],
            PixelBackend::new(),
        );
        map.initialize().unwrap();

        let report = map.frame().unwrap();
        assert_eq!(report.pending, 4);
        assert!(!report.is_settled());
        assert_eq!(report.draw.tiles_drawn, 0);
        assert!(!map.is_covered());
    }

    #[test]
    fn test_overlay_change_redraws_and_hit_test() {
        let mut map = map_with(PreloadedScheduler::default(), PixelBackend::new());
        map.initialize().unwrap();
        map.frame().unwrap();
        map.frame().unwrap();
        assert!(!map.frame().unwrap().redrawn);

        let center = map.view().center_geo();
        map.overlays_mut().markers.create(Marker::new(center));
        let report = map.frame().unwrap();
        assert!(report.redrawn);
        assert_eq!(report.elements, 1);

        let hit = map.hit_test(256.0, 256.0).unwrap().unwrap();
        assert_eq!(hit.element.unwrap().kind, ElementKind::Marker);
    }

    #[test]
    fn test_dispose_is_idempotent_and_releases_tiles() {
        let mut map = map_with(loaded_everywhere(1), PixelBackend::new());
        map.initialize().unwrap();
        map.frame().unwrap();
        assert_eq!(map.cache().len(), 4);

        map.dispose();
        map.dispose();
        assert!(map.is_disposed());
        assert_eq!(map.backend().state(), DrawerState::Disposed);
        assert!(map.cache().is_empty());
        assert_eq!(map.frame(), Err(DrawerError::Disposed));
    }

    #[test]
    fn test_dispose_leaves_shared_cache_alone() {
        let cache = Arc::new(TileCache::new(
            Arc::new(loaded_everywhere(1)),
            CacheConfig::default(),
        ));
        let mut first = MapContext::new(
            world_view(),
            Arc::clone(&cache),
            vec!["osm".to_string()],
            PixelBackend::new(),
        );
        let mut second = MapContext::new(
            world_view(),
            Arc::clone(&cache),
            vec!["osm".to_string()],
            VectorBackend::new(),
        );
        first.initialize().unwrap();
        second.initialize().unwrap();
        first.frame().unwrap();

        drop(first);
        assert_eq!(cache.len(), 4);

        let report = second.frame().unwrap();
        assert_eq!(report.pending, 0);
        assert!(report.redrawn);
        assert!(cache
            .get(&TileKey::new(0, 0, 1, "osm"))
            .is_some_and(|tile| tile.status() == TileStatus::Loaded));
    }

    #[test]
    fn test_boxed_backend() {
        let backend: Box<dyn RenderBackend> = Box::new(VectorBackend::new());
        let mut map = map_with(loaded_everywhere(1), backend);
        map.initialize().unwrap();
        assert_eq!(map.backend().name(), "vector");
        let report = map.frame().unwrap();
        assert_eq!(report.draw.tiles_skipped, 8);
    }
}
