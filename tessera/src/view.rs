//! View state: where the map is looking.
//!
//! A [`ViewState`] is a plain value: fractional center tile at a zoom level
//! plus the viewport size in pixels. Input handlers and programmatic moves
//! produce new values; the cache and drawers only read them.

use std::collections::HashSet;

use crate::coord::{
    geo_to_tile, tile_to_geo, tiles_at_zoom, GeoPoint, TilePoint, MAX_ZOOM, TILE_SIZE,
};
use crate::tile::TileKey;

/// Extra ring of tiles requested around the visible area.
pub const TILE_MARGIN: i64 = 1;

/// Current view of the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    center: TilePoint,
    zoom: u8,
    width: u32,
    height: u32,
}

/// Where one tile lands on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlacement {
    pub key: TileKey,
    /// Screen position of the tile's top-left corner, in pixels.
    pub x: f64,
    pub y: f64,
}

impl ViewState {
    /// Create a view centered on fractional tile coordinates.
    pub fn new(center: TilePoint, zoom: u8, width: u32, height: u32) -> Self {
        let zoom = zoom.min(MAX_ZOOM);
        Self {
            center: normalize_center(center, zoom),
            zoom,
            width,
            height,
        }
    }

    /// Create a view centered on a geographic point.
    pub fn from_geo(point: GeoPoint, zoom: u8, width: u32, height: u32) -> Self {
        let zoom = zoom.min(MAX_ZOOM);
        Self::new(geo_to_tile(point, zoom), zoom, width, height)
    }

    pub fn center(&self) -> TilePoint {
        self.center
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Geographic position of the view center.
    pub fn center_geo(&self) -> GeoPoint {
        tile_to_geo(self.center, self.zoom)
    }

    /// New view with a different viewport size.
    pub fn with_size(&self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..*self
        }
    }

    /// Move the view by a pixel offset; positive `dx` pans east, positive
    /// `dy` pans south.
    pub fn pan_pixels(&self, dx: f64, dy: f64) -> Self {
        let tile = TILE_SIZE as f64;
        let center = TilePoint::new(self.center.x + dx / tile, self.center.y + dy / tile);
        Self::new(center, self.zoom, self.width, self.height)
    }

    /// Change zoom while keeping the geographic center in place.
    pub fn set_zoom(&self, zoom: u8) -> Self {
        let zoom = zoom.min(MAX_ZOOM);
        let factor = 2.0_f64.powi(zoom as i32 - self.zoom as i32);
        let center = TilePoint::new(self.center.x * factor, self.center.y * factor);
        Self::new(center, zoom, self.width, self.height)
    }

    pub fn zoom_in(&self) -> Self {
        self.set_zoom(self.zoom.saturating_add(1))
    }

    pub fn zoom_out(&self) -> Self {
        self.set_zoom(self.zoom.saturating_sub(1))
    }

    /// Fractional tile coordinates under a screen pixel.
    pub fn pixel_to_tile(&self, px: f64, py: f64) -> TilePoint {
        let tile = TILE_SIZE as f64;
        TilePoint::new(
            self.center.x + (px - self.width as f64 / 2.0) / tile,
            self.center.y + (py - self.height as f64 / 2.0) / tile,
        )
    }

    /// Geographic position under a screen pixel.
    pub fn pixel_to_geo(&self, px: f64, py: f64) -> GeoPoint {
        tile_to_geo(self.pixel_to_tile(px, py), self.zoom)
    }

    /// Screen pixel of a geographic point, using the world copy nearest to
    /// the view center.
    pub fn geo_to_pixel(&self, point: GeoPoint) -> (f64, f64) {
        let target = geo_to_tile(point, self.zoom);
        self.tile_to_pixel(target)
    }

    /// Screen pixel of fractional tile coordinates, nearest world copy.
    pub fn tile_to_pixel(&self, target: TilePoint) -> (f64, f64) {
        let tile = TILE_SIZE as f64;
        let dx = nearest_copy(target.x - self.center.x, self.world_tiles());
        let dy = target.y - self.center.y;
        (
            self.width as f64 / 2.0 + dx * tile,
            self.height as f64 / 2.0 + dy * tile,
        )
    }

    /// Screen position of a tile's top-left corner, nearest world copy.
    pub fn tile_screen_origin(&self, key: &TileKey) -> (f64, f64) {
        self.tile_to_pixel(TilePoint::new(key.x() as f64, key.y() as f64))
    }

    /// Inclusive grid index ranges covering the viewport plus the margin:
    /// `(min_x, max_x, min_y, max_y)`. X indices are not wrapped.
    pub fn cell_range(&self) -> (i64, i64, i64, i64) {
        let tile = TILE_SIZE as f64;
        let half_w = self.width as f64 / 2.0 / tile;
        let half_h = self.height as f64 / 2.0 / tile;
        let min_x = (self.center.x - half_w).floor() as i64 - TILE_MARGIN;
        let max_x = (self.center.x + half_w).ceil() as i64 - 1 + TILE_MARGIN;
        let min_y = (self.center.y - half_h).floor() as i64 - TILE_MARGIN;
        let max_y = (self.center.y + half_h).ceil() as i64 - 1 + TILE_MARGIN;
        (min_x, max_x, min_y, max_y)
    }

    /// Every grid cell covering the viewport with its screen position.
    ///
    /// Cells outside the grid vertically are skipped; horizontally the world
    /// repeats, so one key can appear in several placements at low zoom.
    pub fn placements(&self, layer: &str) -> Vec<TilePlacement> {
        let tile = TILE_SIZE as f64;
        let (min_x, max_x, min_y, max_y) = self.cell_range();
        let half_w = self.width as f64 / 2.0;
        let half_h = self.height as f64 / 2.0;

        let mut out = Vec::new();
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                if let Some(key) = TileKey::wrapping(x, y, self.zoom, layer) {
                    out.push(TilePlacement {
                        key,
                        x: half_w + (x as f64 - self.center.x) * tile,
                        y: half_h + (y as f64 - self.center.y) * tile,
                    });
                }
            }
        }
        out
    }

    /// Keys needed to cover the viewport for one layer, nearest to the
    /// center first, without duplicates.
    pub fn needed_keys(&self, layer: &str) -> Vec<TileKey> {
        let mut placements = self.placements(layer);
        let cx = self.width as f64 / 2.0;
        let cy = self.height as f64 / 2.0;
        let half = TILE_SIZE as f64 / 2.0;
        let distance =
            |p: &TilePlacement| (p.x + half - cx).powi(2) + (p.y + half - cy).powi(2);
        placements.sort_by(|a, b| distance(a).total_cmp(&distance(b)));

        let mut seen = HashSet::new();
        placements
            .into_iter()
            .filter(|p| seen.insert(p.key.clone()))
            .map(|p| p.key)
            .collect()
    }

    fn world_tiles(&self) -> f64 {
        tiles_at_zoom(self.zoom) as f64
    }
}

/// Wrap x into `[0, n)` and clamp y into `[0, n]`.
fn normalize_center(center: TilePoint, zoom: u8) -> TilePoint {
    let n = tiles_at_zoom(zoom) as f64;
    let x = if center.x.is_finite() {
        center.x.rem_euclid(n)
    } else {
        n / 2.0
    };
    let y = if center.y.is_finite() {
        center.y.clamp(0.0, n)
    } else {
        n / 2.0
    };
    TilePoint::new(x, y)
}

/// Shift a horizontal tile offset onto the nearest copy of the world.
fn nearest_copy(dx: f64, world: f64) -> f64 {
    let mut dx = dx.rem_euclid(world);
    if dx > world / 2.0 {
        dx -= world;
    }
    dx
}
