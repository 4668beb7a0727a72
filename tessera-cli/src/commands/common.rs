//! Argument types and helpers shared across commands.

use clap::ValueEnum;

use tessera::config::ConfigFile;
use tessera::coord::MAX_ZOOM;
use tessera::{GeoPoint, ViewState};

use crate::error::CliError;

/// Render backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// RGBA surface written out as PNG
    Pixel,
    /// Screen-space vector geometry, summarized on stdout
    Vector,
}

/// View overrides from the command line. Unset fields come from `[view]`.
#[derive(Debug, Clone, Default)]
pub struct ViewArgs {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub zoom: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Resolve the initial view: CLI first, then config.
pub fn resolve_view(args: &ViewArgs, config: &ConfigFile) -> Result<ViewState, CliError> {
    let lat = args.lat.unwrap_or(config.view.lat);
    let lon = args.lon.unwrap_or(config.view.lon);
    let zoom = args.zoom.unwrap_or(config.view.zoom);
    let width = args.width.unwrap_or(config.view.width);
    let height = args.height.unwrap_or(config.view.height);

    // Latitudes beyond the projection limit clamp to it
    if !lat.is_finite() || lat.abs() > 90.0 {
        return Err(CliError::Config(format!("latitude {} outside -90..90", lat)));
    }
    if !lon.is_finite() || lon.abs() > 180.0 {
        return Err(CliError::Config(format!("longitude {} outside -180..180", lon)));
    }
    if zoom > MAX_ZOOM {
        return Err(CliError::Config(format!("zoom {} above maximum {}", zoom, MAX_ZOOM)));
    }
    if width == 0 || height == 0 {
        return Err(CliError::Config(format!(
            "surface size {}x{} must be at least 1x1",
            width, height
        )));
    }

    Ok(ViewState::from_geo(GeoPoint::new(lon, lat), zoom, width, height))
}

/// Layers to draw: the CLI list if given, else every configured layer.
///
/// Every requested layer must be configured.
pub fn resolve_layers(requested: &[String], config: &ConfigFile) -> Result<Vec<String>, CliError> {
    if requested.is_empty() {
        return Ok(config.layer_ids());
    }
    for id in requested {
        if config.layer(id).is_none() {
            return Err(CliError::Config(format!(
                "layer '{}' is not configured (known: {})",
                id,
                config.layer_ids().join(", ")
            )));
        }
    }
    Ok(requested.to_vec())
}

/// Parse `LAT,LON` into a point.
pub fn parse_lat_lon(value: &str) -> Result<GeoPoint, String> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got '{}'", value))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("invalid latitude '{}'", lat.trim()))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|_| format!("invalid longitude '{}'", lon.trim()))?;
    Ok(GeoPoint::new(lon, lat))
}

/// Split `section.key`; layer sections contain a dot themselves.
pub fn split_config_key(key: &str) -> Result<(&str, &str), CliError> {
    match key.rsplit_once('.') {
        Some((section, name)) if !section.is_empty() && !name.is_empty() => Ok((section, name)),
        _ => Err(CliError::Config(format!(
            "expected a key like 'view.zoom' or 'layer.osm.url', got '{}'",
            key
        ))),
    }
}
