//! The tile entity: identity, lifecycle state and payload ownership.
//!
//! State changes happen only through the crate-internal transition methods
//! used by the cache and the fetch pipeline. Every applied transition is
//! published once, in order, to the tile's listeners and its watch channel.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{TileData, TileError, TileKey, TileStatus};

/// Callback invoked after each state transition.
///
/// Listeners run on the thread that performed the transition and must not
/// call back into the same tile.
pub type TileListener = Box<dyn Fn(&TileKey, &TileStatus) + Send + Sync>;

struct TileState {
    status: TileStatus,
    raw: Option<Bytes>,
    data: Option<Arc<TileData>>,
    /// Set when the tile is evicted while loading.
    discard: bool,
    attempts: u32,
    consecutive_failures: u32,
    failed_at: Option<Instant>,
}

/// A tile tracked by the cache.
pub struct Tile {
    key: TileKey,
    state: Mutex<TileState>,
    /// Also serializes dispatch so observers see transitions in order.
    listeners: Mutex<Vec<TileListener>>,
    holders: AtomicUsize,
    last_used: AtomicU64,
    status_tx: watch::Sender<TileStatus>,
}

impl Tile {
    /// Create a tile in the `Queued` state.
    pub fn new(key: TileKey) -> Self {
        let (status_tx, _) = watch::channel(TileStatus::Queued);
        Self {
            key,
            state: Mutex::new(TileState {
                status: TileStatus::Queued,
                raw: None,
                data: None,
                discard: false,
                attempts: 0,
                consecutive_failures: 0,
                failed_at: None,
            }),
            listeners: Mutex::new(Vec::new()),
            holders: AtomicUsize::new(0),
            last_used: AtomicU64::new(0),
            status_tx,
        }
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn status(&self) -> TileStatus {
        self.state.lock().status.clone()
    }

    /// Decoded payload, present only while `Loaded`.
    pub fn data(&self) -> Option<Arc<TileData>> {
        self.state.lock().data.clone()
    }

    /// Size of the decoded payload in bytes, 0 when not loaded.
    pub fn byte_size(&self) -> usize {
        self.state
            .lock()
            .data
            .as_ref()
            .map(|d| d.byte_size())
            .unwrap_or(0)
    }

    /// Number of fetch attempts started for this tile.
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Failures since the last successful load.
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Number of live [`TileHandle`]s.
    pub fn holder_count(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }

    /// Cache tick of the last request or reconcile that needed this tile.
    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_used.fetch_max(tick, Ordering::Relaxed);
    }

    /// Register a listener for subsequent transitions.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&TileKey, &TileStatus) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Receiver that always holds the latest status.
    pub fn watch(&self) -> watch::Receiver<TileStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until the tile is `Loaded`, `Error` or `Disposed`.
    pub async fn wait_terminal(&self) -> TileStatus {
        let mut rx = self.status_tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Take an external hold; held tiles are never evicted by reconcile.
    pub fn hold(self: &Arc<Self>) -> TileHandle {
        self.holders.fetch_add(1, Ordering::AcqRel);
        TileHandle {
            tile: Arc::clone(self),
        }
    }

    /// `Queued → Loading`. Returns false if the tile was not queued.
    pub(crate) fn begin_loading(&self) -> bool {
        self.transition(|state| {
            if state.status != TileStatus::Queued {
                return None;
            }
            state.attempts += 1;
            Some(TileStatus::Loading)
        })
        .is_some()
    }

    /// Hand the fetched bytes to the tile. Refused once the tile is marked
    /// for discard.
    pub(crate) fn attach_raw(&self, bytes: Bytes) {
        let mut state = self.state.lock();
        if state.status == TileStatus::Loading && !state.discard {
            state.raw = Some(bytes);
        }
    }

    /// Bytes to decode, or `None` if the tile refused them.
    pub(crate) fn take_raw(&self) -> Option<Bytes> {
        self.state.lock().raw.take()
    }

    /// Finish a fetch: `Loading → Loaded | Error`.
    ///
    /// A tile evicted mid-flight drops the result, reports
    /// `Error(Cancelled)` and then becomes `Disposed`. Returns false when the
    /// tile was not loading.
    pub(crate) fn complete(&self, result: Result<TileData, TileError>) -> bool {
        let mut discarded = false;
        let applied = self
            .transition(|state| {
                if state.status != TileStatus::Loading {
                    return None;
                }
                state.raw = None;
                if state.discard {
                    discarded = true;
                    state.data = None;
                    return Some(TileStatus::Error(TileError::Cancelled));
                }
                match result {
                    Ok(data) => {
                        state.data = Some(Arc::new(data));
                        state.consecutive_failures = 0;
                        state.failed_at = None;
                        Some(TileStatus::Loaded)
                    }
                    Err(e) => {
                        state.consecutive_failures += 1;
                        state.failed_at = Some(Instant::now());
                        Some(TileStatus::Error(e))
                    }
                }
            })
            .is_some();

        if discarded {
            self.release();
        }
        applied
    }

    /// Dispose the tile, releasing its payload.
    ///
    /// A loading tile is only marked for discard; it becomes `Disposed` when
    /// its fetch completes. Returns false if the tile was already disposed or
    /// marked.
    pub(crate) fn dispose(&self) -> bool {
        let mut marked = false;
        let disposed = self
            .transition(|state| match state.status {
                TileStatus::Disposed => None,
                TileStatus::Loading => {
                    if !state.discard {
                        state.discard = true;
                        marked = true;
                    }
                    None
                }
                _ => {
                    state.raw = None;
                    state.data = None;
                    Some(TileStatus::Disposed)
                }
            })
            .is_some();
        disposed || marked
    }

    /// `Error → Queued`. Returns false for any other state.
    pub(crate) fn requeue(&self) -> bool {
        self.transition(|state| match state.status {
            TileStatus::Error(_) => {
                state.discard = false;
                Some(TileStatus::Queued)
            }
            _ => None,
        })
        .is_some()
    }

    /// Reason, failure count and time of the current error, if any.
    pub(crate) fn failure(&self) -> Option<(TileError, u32, Instant)> {
        let state = self.state.lock();
        match (&state.status, state.failed_at) {
            (TileStatus::Error(e), Some(at)) => Some((e.clone(), state.consecutive_failures, at)),
            _ => None,
        }
    }

    fn release(&self) {
        self.transition(|state| {
            if state.status == TileStatus::Disposed {
                return None;
            }
            state.raw = None;
            state.data = None;
            Some(TileStatus::Disposed)
        });
    }

    /// Apply `f` and publish the resulting status, if any.
    fn transition<F>(&self, f: F) -> Option<TileStatus>
    where
        F: FnOnce(&mut TileState) -> Option<TileStatus>,
    {
        let listeners = self.listeners.lock();
        let next = {
            let mut state = self.state.lock();
            let next = f(&mut *state)?;
            state.status = next.clone();
            next
        };

        self.status_tx.send_replace(next.clone());
        for listener in listeners.iter() {
            listener(&self.key, &next);
        }
        Some(next)
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("key", &self.key)
            .field("status", &self.status())
            .field("holders", &self.holder_count())
            .finish()
    }
}

/// External hold on a tile.
///
/// While any handle is alive the cache will not evict the tile during
/// reconciliation. Explicit invalidation still disposes it.
pub struct TileHandle {
    tile: Arc<Tile>,
}

impl TileHandle {
    pub fn tile(&self) -> &Arc<Tile> {
        &self.tile
    }
}

impl Deref for TileHandle {
    type Target = Tile;

    fn deref(&self) -> &Tile {
        &self.tile
    }
}

impl Clone for TileHandle {
    fn clone(&self) -> Self {
        self.tile.hold()
    }
}

impl Drop for TileHandle {
    fn drop(&mut self) {
        self.tile.holders.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for TileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TileHandle").field(&self.tile.key).finish()
    }
}
