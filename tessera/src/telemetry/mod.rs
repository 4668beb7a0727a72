//! Engine telemetry.
//!
//! Lock-free atomic counters updated by the cache and the fetch pipeline,
//! read through immutable snapshots.
//!
//! ```text
//! TileCache ──┐
//!             ├──► EngineMetrics ─────► TelemetrySnapshot ─────► CLI / logs
//! FetchPipeline┘   (atomic counters)    (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```
//! use tessera::telemetry::EngineMetrics;
//!
//! let metrics = EngineMetrics::new();
//! metrics.tile_requested(false);
//! assert_eq!(metrics.snapshot().tile_requests, 1);
//! ```

mod metrics;
mod snapshot;

pub use metrics::EngineMetrics;
pub use snapshot::TelemetrySnapshot;
