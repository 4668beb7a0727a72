//! Tile identity, lifecycle and payloads.
//!
//! - [`TileKey`] - value identity of a tile (`x`, `y`, `zoom`, `layer`)
//! - [`Tile`] - lifecycle state machine owning raw and decoded payloads
//! - [`TileData`] - decoded raster pixels or vector geometry

mod data;
mod entity;
mod key;
mod status;

pub use data::{
    GeometryKind, PropertyValue, TileData, VectorFeature, VectorLayer, VectorTile, DEFAULT_EXTENT,
};
pub use entity::{Tile, TileHandle, TileListener};
pub use key::TileKey;
pub use status::{TileError, TileStatus};
