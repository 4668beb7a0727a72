//! Fetching and decoding tiles.
//!
//! [`FetchPipeline`] is the production [`TileScheduler`](crate::cache::TileScheduler):
//! it resolves a tile's URL from its layer, consults the optional disk store,
//! downloads with bounded concurrency and decodes on the blocking pool.

mod decode;
pub mod mvt;
mod pipeline;

pub use decode::{decode_raster, decode_tile, decode_vector, decompress};
pub use mvt::MvtError;
pub use pipeline::{FetchConfig, FetchPipeline, FetchPipelineBuilder, DEFAULT_MAX_CONCURRENT_FETCHES};
