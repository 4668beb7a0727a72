//! On-disk tile store.
//!
//! Raw tile bytes are kept as individual files keyed by layer, zoom and grid
//! position:
//!
//! ```text
//! {root}/{layer}/{zoom}/{x}/{y}.tile
//! ```
//!
//! Writes go to a uniquely named temporary file in the same directory and are
//! renamed into place, so concurrent readers never see a partial tile and
//! concurrent writers of different keys never collide.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

use crate::tile::TileKey;

/// Extension of finished tile files.
const TILE_EXTENSION: &str = "tile";

/// Errors from the disk tile store.
#[derive(Debug, Error)]
pub enum DiskStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Disk store task failed: {0}")]
    Task(String),
}

/// File count and total size of a store directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStoreStats {
    pub files: u64,
    pub bytes: u64,
}

/// Raw tile bytes persisted under a root directory.
#[derive(Debug)]
pub struct DiskTileStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl DiskTileStore {
    /// Open a store, creating the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, DiskStoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        info!(dir = %root.display(), "Disk tile store opened");
        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that holds `key`.
    pub fn path_for(&self, key: &TileKey) -> PathBuf {
        self.root.join(key.cache_path())
    }

    /// Read a tile; `Ok(None)` when it was never stored.
    pub async fn get(&self, key: &TileKey) -> Result<Option<Bytes>, DiskStoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(tile = %key, bytes = data.len(), "Disk store hit");
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a tile atomically.
    pub async fn put(&self, key: &TileKey, data: &[u8]) -> Result<(), DiskStoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let sequence = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{}.{}.tmp", std::process::id(), sequence));
        tokio::fs::write(&temp_path, data).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        debug!(tile = %key, bytes = data.len(), "Disk store write");
        Ok(())
    }

    /// Remove a tile; removing a missing tile is not an error.
    pub async fn remove(&self, key: &TileKey) -> Result<(), DiskStoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stats(&self) -> Result<DiskStoreStats, DiskStoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || disk_store_stats(&root))
            .await
            .map_err(|e| DiskStoreError::Task(e.to_string()))?
    }

    pub async fn clear(&self) -> Result<DiskStoreStats, DiskStoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || clear_disk_store(&root))
            .await
            .map_err(|e| DiskStoreError::Task(e.to_string()))?
    }
}

/// Count tile files and bytes under `dir`. A missing directory is empty.
pub fn disk_store_stats(dir: &Path) -> Result<DiskStoreStats, DiskStoreError> {
    let mut stats = DiskStoreStats::default();
    visit_tiles(dir, &mut |_, len| {
        stats.files += 1;
        stats.bytes += len;
        Ok(())
    })?;
    Ok(stats)
}

/// Delete every tile file under `dir` and prune empty directories.
///
/// Returns what was removed. The root directory itself is kept.
pub fn clear_disk_store(dir: &Path) -> Result<DiskStoreStats, DiskStoreError> {
    let mut removed = DiskStoreStats::default();
    visit_tiles(dir, &mut |path, len| {
        std::fs::remove_file(path)?;
        removed.files += 1;
        removed.bytes += len;
        Ok(())
    })?;
    prune_empty_dirs(dir, true)?;
    info!(
        dir = %dir.display(),
        files = removed.files,
        bytes = removed.bytes,
        "Disk tile store cleared"
    );
    Ok(removed)
}

fn visit_tiles(
    dir: &Path,
    f: &mut dyn FnMut(&Path, u64) -> io::Result<()>,
) -> Result<(), DiskStoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            visit_tiles(&path, f)?;
        } else if file_type.is_file()
            && path.extension().is_some_and(|ext| ext == TILE_EXTENSION)
        {
            let len = entry.metadata()?.len();
            f(&path, len)?;
        }
    }
    Ok(())
}

fn prune_empty_dirs(dir: &Path, is_root: bool) -> io::Result<bool> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };

    let mut empty = true;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if !prune_empty_dirs(&entry.path(), false)? {
                empty = false;
            }
        } else {
            empty = false;
        }
    }

    if empty && !is_root {
        std::fs::remove_dir(dir)?;
    }
    Ok(empty)
}
