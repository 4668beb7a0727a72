//! Render surface contract and backends.
//!
//! A [`RenderBackend`] consumes the loaded tiles of a [`TileCache`], draws
//! the [`Overlays`] above them and answers raycasts against what it drew.
//! Backends follow one lifecycle:
//!
//! ```text
//! Uninitialized ──initialize──► Initialized ──dispose──► Disposed
//!                                 │     ▲
//!                                 └─────┘ draw / draw_elements / raycast
//! ```
//!
//! `Disposed` is terminal. Disposing twice, or before initializing, is a
//! no-op; drawing after disposal fails with [`DrawerError::Disposed`].
//!
//! Two backends ship with the crate:
//!
//! - [`PixelBackend`] - off-screen RGBA surface with PNG export
//! - [`VectorBackend`] - screen-space display list of vector geometry

mod pixel;
mod vector;

pub use pixel::{PixelBackend, DEFAULT_BACKGROUND};
pub use vector::{DisplayItem, DisplaySource, VectorBackend};

use thiserror::Error;

use crate::cache::TileCache;
use crate::coord::GeoPoint;
use crate::overlay::{ElementHit, Overlays};
use crate::view::ViewState;

/// Errors from render backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawerError {
    #[error("Render backend has been disposed")]
    Disposed,

    #[error("Render backend is not initialized")]
    NotInitialized,

    #[error("Render surface error: {0}")]
    Surface(String),
}

/// Lifecycle state of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawerState {
    Uninitialized,
    Initialized,
    Disposed,
}

impl DrawerState {
    /// Ok when draw calls are allowed.
    pub fn ensure_ready(self) -> Result<(), DrawerError> {
        match self {
            DrawerState::Initialized => Ok(()),
            DrawerState::Uninitialized => Err(DrawerError::NotInitialized),
            DrawerState::Disposed => Err(DrawerError::Disposed),
        }
    }
}

/// Everything a backend reads during one frame.
#[derive(Clone, Copy)]
pub struct DrawContext<'a> {
    pub view: &'a ViewState,
    pub cache: &'a TileCache,
    /// Layer ids, bottom first.
    pub layers: &'a [String],
    pub overlays: &'a Overlays,
}

/// Tile counts from one `draw` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Placements composited from loaded tiles.
    pub tiles_drawn: usize,
    /// Placements with no loaded tile (absent, pending or failed).
    pub tiles_missing: usize,
    /// Loaded tiles whose content this backend does not draw.
    pub tiles_skipped: usize,
}

/// A ray in screen space: x and y in pixels, z pointing into the map.
///
/// The map surface is the plane `z = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: [f64; 3],
    /// Unit direction.
    pub direction: [f64; 3],
}

impl Ray {
    /// Ray with the direction normalized. A zero direction never hits.
    pub fn new(origin: [f64; 3], direction: [f64; 3]) -> Self {
        let len = direction.iter().map(|d| d * d).sum::<f64>().sqrt();
        let direction = if len > 0.0 {
            [direction[0] / len, direction[1] / len, direction[2] / len]
        } else {
            [0.0; 3]
        };
        Self { origin, direction }
    }

    /// Ray looking straight down at a screen pixel from one unit above.
    pub fn from_screen(px: f64, py: f64) -> Self {
        Self::new([px, py, -1.0], [0.0, 0.0, 1.0])
    }

    /// Where the ray meets the map plane: `(x, y, distance)`.
    pub fn intersect_surface(&self, max_distance: f64) -> Option<(f64, f64, f64)> {
        let dz = self.direction[2];
        if dz == 0.0 {
            return None;
        }
        let t = -self.origin[2] / dz;
        if !t.is_finite() || t < 0.0 || t > max_distance {
            return None;
        }
        Some((
            self.origin[0] + t * self.direction[0],
            self.origin[1] + t * self.direction[1],
            t,
        ))
    }
}

/// Result of a successful raycast.
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Screen position of the hit, in pixels.
    pub point: (f64, f64),
    pub geo: GeoPoint,
    /// Distance along the ray.
    pub distance: f64,
    /// Overlay element under the hit, if any.
    pub element: Option<ElementHit>,
}

/// Axis-aligned screen rectangle, inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn from_point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub fn include(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// A render surface.
///
/// Implementations are chosen when the map is built; the frame driver talks
/// to them only through this trait.
pub trait RenderBackend: Send {
    fn name(&self) -> &'static str;

    fn state(&self) -> DrawerState;

    /// Allocate the surface. Calling it again while initialized resizes.
    fn initialize(&mut self, width: u32, height: u32) -> Result<(), DrawerError>;

    /// Composite the loaded tiles of every layer for the current view.
    ///
    /// Tiles that are not loaded leave their area empty.
    fn draw(&mut self, ctx: &DrawContext<'_>) -> Result<DrawStats, DrawerError>;

    /// Draw overlay elements above the tiles. Returns how many were drawn.
    fn draw_elements(&mut self, ctx: &DrawContext<'_>) -> Result<usize, DrawerError>;

    /// Intersect `ray` with the drawn surface.
    ///
    /// Misses until something has been drawn since initialization.
    fn raycast(
        &self,
        ctx: &DrawContext<'_>,
        ray: &Ray,
        max_distance: f64,
    ) -> Result<Option<RaycastHit>, DrawerError>;

    /// Release the surface. Idempotent.
    fn dispose(&mut self);
}

impl RenderBackend for Box<dyn RenderBackend> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn state(&self) -> DrawerState {
        (**self).state()
    }

    fn initialize(&mut self, width: u32, height: u32) -> Result<(), DrawerError> {
        (**self).initialize(width, height)
    }

    fn draw(&mut self, ctx: &DrawContext<'_>) -> Result<DrawStats, DrawerError> {
        (**self).draw(ctx)
    }

    fn draw_elements(&mut self, ctx: &DrawContext<'_>) -> Result<usize, DrawerError> {
        (**self).draw_elements(ctx)
    }

    fn raycast(
        &self,
        ctx: &DrawContext<'_>,
        ray: &Ray,
        max_distance: f64,
    ) -> Result<Option<RaycastHit>, DrawerError> {
        (**self).raycast(ctx, ray, max_distance)
    }

    fn dispose(&mut self) {
        (**self).dispose()
    }
}

/// Hit on the map plane if it lands inside `bounds`.
pub(crate) fn surface_hit(
    ctx: &DrawContext<'_>,
    ray: &Ray,
    max_distance: f64,
    bounds: Option<Bounds>,
) -> Option<RaycastHit> {
    let (x, y, distance) = ray.intersect_surface(max_distance)?;
    let element = ctx.overlays.hit_test(ctx.view, x, y);
    let on_surface = bounds.is_some_and(|b| b.contains(x, y));
    if !on_surface && element.is_none() {
        return None;
    }
    Some(RaycastHit {
        point: (x, y),
        geo: ctx.view.pixel_to_geo(x, y),
        distance,
        element,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_ray_hits_plane() {
        let ray = Ray::from_screen(10.0, 20.0);
        assert_eq!(ray.intersect_surface(5.0), Some((10.0, 20.0, 1.0)));
        assert_eq!(ray.intersect_surface(0.5), None);
    }

    #[test]
    fn test_ray_pointing_away_misses() {
        let away = Ray::new([0.0, 0.0, -1.0], [0.0, 0.0, -1.0]);
        assert!(away.intersect_surface(100.0).is_none());

        let parallel = Ray::new([0.0, 0.0, -1.0], [1.0, 0.0, 0.0]);
        assert!(parallel.intersect_surface(100.0).is_none());

        let zero = Ray::new([0.0, 0.0, -1.0], [0.0, 0.0, 0.0]);
        assert!(zero.intersect_surface(100.0).is_none());
    }

    #[test]
    fn test_oblique_ray() {
        let ray = Ray::new([0.0, 0.0, -2.0], [1.0, 0.0, 1.0]);
        let (x, y, t) = ray.intersect_surface(10.0).unwrap();
        assert!((x - 2.0).abs() < 1e-12);
        assert_eq!(y, 0.0);
        assert!((t - 2.0 * 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_bounds() {
        let mut b = Bounds::from_point(5.0, 5.0);
        b.include(10.0, 0.0);
        assert!(b.contains(7.0, 3.0));
        assert!(!b.contains(11.0, 3.0));
    }

    #[test]
    fn test_state_readiness() {
        assert_eq!(
            DrawerState::Uninitialized.ensure_ready(),
            Err(DrawerError::NotInitialized)
        );
        assert_eq!(DrawerState::Disposed.ensure_ready(), Err(DrawerError::Disposed));
        assert!(DrawerState::Initialized.ensure_ready().is_ok());
    }
}
