//! Tessera - a geospatial tile engine
//!
//! This library converts between geographic and tile coordinates, tracks
//! tiles through their fetch lifecycle, fetches and decodes raster and vector
//! tiles from remote providers, and composites them with overlays onto
//! pluggable render backends.
//!
//! The usual entry point is [`map::MapContext`], which owns the view, the
//! tile cache, the overlays and one render backend, and runs frames.

pub mod cache;
pub mod config;
pub mod coord;
pub mod drawer;
pub mod fetch;
pub mod logging;
pub mod map;
pub mod overlay;
pub mod provider;
pub mod telemetry;
pub mod tile;
pub mod view;

pub use coord::{GeoPoint, MercatorPoint, TilePoint};
pub use map::MapContext;
pub use tile::{Tile, TileKey, TileStatus};
pub use view::ViewState;
