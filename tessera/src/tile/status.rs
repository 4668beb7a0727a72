//! Tile lifecycle states and failure reasons.

use std::fmt;

use thiserror::Error;

/// Reason a tile ended in the `Error` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// Transport failure or non-success HTTP status.
    #[error("network error: {0}")]
    Network(String),

    /// Bytes arrived but could not be decompressed or parsed.
    #[error("decode error: {0}")]
    Decode(String),

    /// Layer is unknown, its template is invalid, or a credential is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Tile was evicted while its fetch was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl TileError {
    /// Whether the cache may re-queue the tile after its cool-down.
    ///
    /// Configuration errors stay until the configuration changes;
    /// cancellations never reach a cached tile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TileError::Network(_) | TileError::Decode(_))
    }
}

/// Lifecycle of a tile.
///
/// `Queued → Loading → Loaded | Error`, and `Disposed` from any state.
/// `Disposed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileStatus {
    Queued,
    Loading,
    Loaded,
    Error(TileError),
    Disposed,
}

impl TileStatus {
    /// Whether no further fetch transition will happen without a re-queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TileStatus::Loaded | TileStatus::Error(_) | TileStatus::Disposed
        )
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, TileStatus::Loaded)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TileStatus::Error(_))
    }

    /// Short lowercase name, used in logs and stats.
    pub fn name(&self) -> &'static str {
        match self {
            TileStatus::Queued => "queued",
            TileStatus::Loading => "loading",
            TileStatus::Loaded => "loaded",
            TileStatus::Error(_) => "error",
            TileStatus::Disposed => "disposed",
        }
    }
}

impl fmt::Display for TileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileStatus::Error(e) => write!(f, "error({})", e),
            other => f.write_str(other.name()),
        }
    }
}
