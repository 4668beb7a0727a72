//! Tile identity.
//!
//! A [`TileKey`] names one tile of one layer: grid position, zoom level and
//! the id of the layer (provider) it belongs to. Keys compare and hash by
//! value, so two keys built from the same parts are interchangeable.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::coord::{tile_to_quadkey, tiles_at_zoom, MAX_ZOOM};

/// Identity of a tile: `(x, y, zoom, layer)`.
///
/// # Example
///
/// ```
/// use tessera::tile::TileKey;
///
/// let key = TileKey::new(3, 5, 7, "osm");
/// assert_eq!(key.to_string(), "osm/7/3/5");
/// assert!(key.is_in_range());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    layer: Arc<str>,
    zoom: u8,
    x: u32,
    y: u32,
}

impl TileKey {
    /// Create a key without range checks.
    pub fn new(x: u32, y: u32, zoom: u8, layer: impl Into<Arc<str>>) -> Self {
        Self {
            layer: layer.into(),
            zoom,
            x,
            y,
        }
    }

    /// Create a key from signed grid indices, folding `x` across the
    /// antimeridian.
    ///
    /// Returns `None` when `y` falls outside the grid or the zoom is not
    /// supported; there is nothing to fetch north of the top row.
    pub fn wrapping(x: i64, y: i64, zoom: u8, layer: impl Into<Arc<str>>) -> Option<Self> {
        if zoom > MAX_ZOOM {
            return None;
        }
        let n = tiles_at_zoom(zoom) as i64;
        if !(0..n).contains(&y) {
            return None;
        }
        Some(Self::new(x.rem_euclid(n) as u32, y as u32, zoom, layer))
    }

    /// Whether `x` and `y` lie inside the grid at this zoom.
    pub fn is_in_range(&self) -> bool {
        if self.zoom > MAX_ZOOM {
            return false;
        }
        let n = tiles_at_zoom(self.zoom);
        (self.x as u64) < n && (self.y as u64) < n
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Shared handle to the layer id.
    pub fn layer_id(&self) -> &Arc<str> {
        &self.layer
    }

    /// Bing-style quadkey for this tile.
    pub fn quadkey(&self) -> String {
        tile_to_quadkey(self.x, self.y, self.zoom)
    }

    /// Row index counted from the bottom of the grid (TMS scheme).
    pub fn tms_y(&self) -> u32 {
        let n = tiles_at_zoom(self.zoom);
        (n - 1).saturating_sub(self.y as u64) as u32
    }

    /// Relative path used by the disk tile store: `layer/zoom/x/y.tile`.
    ///
    /// The layer id keeps `[a-z0-9_-]` and writes every other byte as `%XX`,
    /// so distinct layers never share a directory (even on case-insensitive
    /// filesystems) and no layer name can escape the store directory.
    pub fn cache_path(&self) -> PathBuf {
        let mut layer = String::with_capacity(self.layer.len());
        for byte in self.layer.bytes() {
            if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' || byte == b'_' {
                layer.push(byte as char);
            } else {
                layer.push_str(&format!("%{:02X}", byte));
            }
        }
        if layer.is_empty() {
            layer.push('%');
        }

        let mut path = PathBuf::from(layer);
        path.push(self.zoom.to_string());
        path.push(self.x.to_string());
        path.push(format!("{}.tile", self.y));
        path
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.layer, self.zoom, self.x, self.y)
    }
}
