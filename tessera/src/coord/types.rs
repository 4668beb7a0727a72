//! Coordinate type definitions

use thiserror::Error;

/// Latitude limit used for Mercator validity.
pub const MIN_LAT: f64 = -85.0;
pub const MAX_LAT: f64 = 85.0;

/// Longitude range, half-open at the eastern edge.
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Supported zoom levels.
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 23;

/// Edge length of a tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Geographic position in degrees.
///
/// Construction normalizes the value: longitude wraps into [-180, 180),
/// latitude clamps to [`MIN_LAT`, `MAX_LAT`]. NaN components collapse to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    lon: f64,
    lat: f64,
}

impl GeoPoint {
    /// Creates a normalized geographic point.
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon: wrap_longitude(lon),
            lat: clamp_latitude(lat),
        }
    }

    /// Longitude in degrees, within [-180, 180).
    #[inline]
    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// Latitude in degrees, within [-85, 85].
    #[inline]
    pub fn lat(&self) -> f64 {
        self.lat
    }
}

/// Position on the projected plane, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MercatorPoint {
    pub x: f64,
    pub y: f64,
}

/// Fractional tile coordinates at a given zoom.
///
/// The integer part selects the tile, the fractional part the position
/// inside it. Origin is the top-left corner of the global grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePoint {
    pub x: f64,
    pub y: f64,
}

impl TilePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Quadkey contains invalid characters or is too long
    #[error("Invalid quadkey: '{0}' (must contain only digits 0-3 and length <= {MAX_ZOOM})")]
    InvalidQuadkey(String),

    /// Zoom level is outside the supported range
    #[error("Invalid zoom level: {0} (must be between {MIN_ZOOM} and {MAX_ZOOM})")]
    InvalidZoom(u8),
}

/// Wraps a longitude into [-180, 180). NaN becomes 0.
#[inline]
pub fn wrap_longitude(lon: f64) -> f64 {
    if !lon.is_finite() {
        return 0.0;
    }
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= MAX_LON {
        MIN_LON
    } else {
        wrapped
    }
}

/// Clamps a latitude into [`MIN_LAT`, `MAX_LAT`]. NaN becomes 0.
#[inline]
pub fn clamp_latitude(lat: f64) -> f64 {
    if lat.is_nan() {
        return 0.0;
    }
    lat.clamp(MIN_LAT, MAX_LAT)
}
