//! Coordinate conversion module
//!
//! Converts between geographic coordinates (WGS84 degrees), ellipsoidal
//! Mercator meters, and fractional tile coordinates at a zoom level. All
//! functions are pure and total: degenerate inputs are clamped, never rejected.

mod types;

pub use types::{
    clamp_latitude, wrap_longitude, CoordError, GeoPoint, MercatorPoint, TilePoint, MAX_LAT,
    MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM, TILE_SIZE,
};

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

/// WGS84 semi-major axis in meters.
pub const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS84 first eccentricity.
pub const ECCENTRICITY: f64 = 0.081_819_190_842_6;

/// Half the projected equator length in meters.
pub const HALF_EQUATOR: f64 = 20_037_508.342_789;

/// Pixels per meter at zoom 23.
const PIXELS_PER_METER_Z23: f64 = 53.586_593_8;

// Series coefficients for conformal to geodetic latitude.
const C1: f64 = 0.003_356_551_468_879_69;
const C2: f64 = 0.000_006_571_872_710_795_36;
const C3: f64 = 0.000_000_017_645_643_387_02;
const C4: f64 = 0.000_000_000_053_284_784_45;

/// Number of tiles along one axis at the given zoom.
#[inline]
pub fn tiles_at_zoom(zoom: u8) -> u64 {
    1u64 << zoom.min(63)
}

/// Scale applied to meters at zoom 23 to reach the requested zoom.
#[inline]
fn zoom_scale(zoom: u8) -> f64 {
    2.0_f64.powi(zoom as i32 - MAX_ZOOM as i32)
}

/// Forward ellipsoidal Mercator projection.
#[inline]
pub fn geo_to_mercator(point: GeoPoint) -> MercatorPoint {
    let lambda = point.lon().to_radians();
    let phi = point.lat().to_radians();

    let esin = ECCENTRICITY * phi.sin();
    let z = (FRAC_PI_4 + phi / 2.0).tan() / (FRAC_PI_4 + esin.asin() / 2.0).tan().powf(ECCENTRICITY);

    MercatorPoint {
        x: SEMI_MAJOR_AXIS * lambda,
        y: SEMI_MAJOR_AXIS * z.ln(),
    }
}

/// Inverse ellipsoidal Mercator projection.
///
/// Latitude comes from the conformal latitude corrected by a four term
/// series, then normalized like any other [`GeoPoint`].
#[inline]
pub fn mercator_to_geo(point: MercatorPoint) -> GeoPoint {
    let g = FRAC_PI_2 - 2.0 * (1.0 / (point.y / SEMI_MAJOR_AXIS).exp()).atan();
    let lat = g
        + C1 * (2.0 * g).sin()
        + C2 * (4.0 * g).sin()
        + C3 * (6.0 * g).sin()
        + C4 * (8.0 * g).sin();
    let lon = point.x / SEMI_MAJOR_AXIS;

    GeoPoint::new(lon.to_degrees(), lat.to_degrees())
}

/// Projects meters onto the fractional tile grid at `zoom`.
#[inline]
pub fn mercator_to_tile(point: MercatorPoint, zoom: u8) -> TilePoint {
    let scale = PIXELS_PER_METER_Z23 * zoom_scale(zoom) / TILE_SIZE as f64;
    TilePoint {
        x: (HALF_EQUATOR + point.x) * scale,
        y: (HALF_EQUATOR - point.y) * scale,
    }
}

/// Maps fractional tile coordinates at `zoom` back to meters.
#[inline]
pub fn tile_to_mercator(tile: TilePoint, zoom: u8) -> MercatorPoint {
    let meters_per_tile = TILE_SIZE as f64 / (PIXELS_PER_METER_Z23 * zoom_scale(zoom));
    MercatorPoint {
        x: tile.x * meters_per_tile - HALF_EQUATOR,
        y: HALF_EQUATOR - tile.y * meters_per_tile,
    }
}

/// Converts a geographic point to fractional tile coordinates.
///
/// The origin is the top-left (north-west) corner of the global grid; x grows
/// east and y grows south.
///
/// # Example
///
/// ```
/// use tessera::coord::{geo_to_tile, GeoPoint};
///
/// let t = geo_to_tile(GeoPoint::new(0.0, 0.0), 1);
/// assert!((t.x - 1.0).abs() < 1e-6);
/// assert!((t.y - 1.0).abs() < 1e-6);
/// ```
#[inline]
pub fn geo_to_tile(point: GeoPoint, zoom: u8) -> TilePoint {
    mercator_to_tile(geo_to_mercator(point), zoom)
}

/// Inverse of [`geo_to_tile`].
#[inline]
pub fn tile_to_geo(tile: TilePoint, zoom: u8) -> GeoPoint {
    mercator_to_geo(tile_to_mercator(tile, zoom))
}

/// Converts tile indices to a Bing-style quadkey.
///
/// Digits are base 4, most significant level first; the key has exactly
/// `zoom` digits.
pub fn tile_to_quadkey(x: u32, y: u32, zoom: u8) -> String {
    let mut quadkey = String::with_capacity(zoom as usize);
    for level in (1..=zoom.min(31)).rev() {
        let mask = 1u32 << (level - 1);
        let mut digit = b'0';
        if x & mask != 0 {
            digit += 1;
        }
        if y & mask != 0 {
            digit += 2;
        }
        quadkey.push(digit as char);
    }
    quadkey
}

/// Parses a quadkey back into `(x, y, zoom)`.
pub fn quadkey_to_tile(quadkey: &str) -> Result<(u32, u32, u8), CoordError> {
    if quadkey.len() > MAX_ZOOM as usize {
        return Err(CoordError::InvalidQuadkey(quadkey.to_string()));
    }

    let zoom = quadkey.len() as u8;
    let mut x = 0u32;
    let mut y = 0u32;
    for (i, c) in quadkey.chars().enumerate() {
        let mask = 1u32 << (zoom as usize - i - 1);
        match c {
            '0' => {}
            '1' => x |= mask,
            '2' => y |= mask,
            '3' => {
                x |= mask;
                y |= mask;
            }
            _ => return Err(CoordError::InvalidQuadkey(quadkey.to_string())),
        }
    }
    Ok((x, y, zoom))
}

/// Ground distance covered by one pixel at `lat` and `zoom`, in meters.
pub fn ground_resolution(lat: f64, zoom: u8) -> f64 {
    let phi = clamp_latitude(lat).to_radians();
    let meters_per_pixel_equator = 1.0 / (PIXELS_PER_METER_Z23 * zoom_scale(zoom));
    meters_per_pixel_equator / scale_factor(phi)
}

/// Approximate distance between two points in meters.
///
/// Measures on the Mercator plane and divides by the projection's scale
/// factor at the mean latitude. Accurate for the short spans used in
/// hit-testing; longitude differences take the short way across the
/// antimeridian.
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let ma = geo_to_mercator(a);
    let mb = geo_to_mercator(b);

    let mut dx = (mb.x - ma.x).abs();
    let world = 2.0 * HALF_EQUATOR;
    if dx > world / 2.0 {
        dx = world - dx;
    }
    let dy = mb.y - ma.y;

    let mean_phi = ((a.lat() + b.lat()) / 2.0).to_radians();
    dx.hypot(dy) / scale_factor(mean_phi)
}

/// Mercator scale factor on the ellipsoid at geodetic latitude `phi`.
#[inline]
fn scale_factor(phi: f64) -> f64 {
    let esin = ECCENTRICITY * phi.sin();
    (1.0 - esin * esin).sqrt() / phi.cos()
}
