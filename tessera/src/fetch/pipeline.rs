//! Asynchronous tile fetch pipeline.
//!
//! ```text
//! schedule(tile) ──► Queued → Loading
//!                        │
//!                        ▼  (spawned task)
//!                 ┌─────────────┐
//!                 │ Layer + URL │──► unknown layer / missing credential ──► Error(Configuration)
//!                 └──────┬──────┘
//!                        ▼
//!                 ┌─────────────┐
//!                 │ Disk store  │──► hit ─────────────────┐
//!                 └──────┬──────┘                         │
//!                        ▼ miss                           │
//!                 ┌─────────────┐                         │
//!                 │ HTTP (permit)│──► failure ──► Error(Network)
//!                 └──────┬──────┘                         │
//!                        ▼                                ▼
//!                 ┌──────────────────────────────────────────┐
//!                 │ Decode (blocking pool) ──► Loaded | Error(Decode)
//!                 └──────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashSet;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::decode::decode_tile;
use crate::cache::{DiskTileStore, TileScheduler};
use crate::provider::{
    AsyncHttpClient, ContentType, ProviderError, ProviderRegistry, TokenResolver,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
use crate::telemetry::EngineMetrics;
use crate::tile::{Tile, TileData, TileError, TileKey};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of HTTP requests in flight at once.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Settings for the fetch pipeline and the HTTP client it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Upper bound on simultaneous HTTP requests.
    pub max_concurrent: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_FETCHES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Loads tiles handed over by the cache.
///
/// Each scheduled tile is moved to `Loading` immediately and then fetched on
/// the given runtime. The pipeline never blocks the caller.
///
/// # Type Parameters
///
/// * `C` - HTTP client; tests substitute a mock
pub struct FetchPipeline<C: AsyncHttpClient> {
    inner: Arc<PipelineInner<C>>,
}

struct PipelineInner<C: AsyncHttpClient> {
    client: C,
    providers: Arc<dyn ProviderRegistry>,
    resolver: Option<Arc<dyn TokenResolver>>,
    disk: Option<Arc<DiskTileStore>>,
    permits: Semaphore,
    runtime: Handle,
    shutdown: CancellationToken,
    /// Layers whose configuration error has already been logged.
    reported_layers: DashSet<String>,
    metrics: Arc<EngineMetrics>,
}

/// Builder for [`FetchPipeline`].
pub struct FetchPipelineBuilder<C: AsyncHttpClient> {
    client: C,
    providers: Arc<dyn ProviderRegistry>,
    runtime: Handle,
    config: FetchConfig,
    resolver: Option<Arc<dyn TokenResolver>>,
    disk: Option<Arc<DiskTileStore>>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl<C: AsyncHttpClient> FetchPipelineBuilder<C> {
    pub fn config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    /// Read tiles from and write them through to `disk`.
    pub fn disk_store(mut self, disk: Arc<DiskTileStore>) -> Self {
        self.disk = Some(disk);
        self
    }

    /// Resolve template tokens through `resolver` before the built-ins.
    pub fn token_resolver(mut self, resolver: Arc<dyn TokenResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> FetchPipeline<C> {
        info!(
            max_concurrent = self.config.max_concurrent,
            disk_store = self.disk.is_some(),
            "Fetch pipeline created"
        );
        FetchPipeline {
            inner: Arc::new(PipelineInner {
                client: self.client,
                providers: self.providers,
                resolver: self.resolver,
                disk: self.disk,
                permits: Semaphore::new(self.config.max_concurrent.max(1)),
                runtime: self.runtime,
                shutdown: CancellationToken::new(),
                reported_layers: DashSet::new(),
                metrics: self.metrics.unwrap_or_default(),
            }),
        }
    }
}

impl<C: AsyncHttpClient> FetchPipeline<C> {
    /// Start building a pipeline that spawns its fetches on `runtime`.
    pub fn builder(
        client: C,
        providers: Arc<dyn ProviderRegistry>,
        runtime: Handle,
    ) -> FetchPipelineBuilder<C> {
        FetchPipelineBuilder {
            client,
            providers,
            runtime,
            config: FetchConfig::default(),
            resolver: None,
            disk: None,
            metrics: None,
        }
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.inner.metrics
    }

    /// Cancel every in-flight fetch. Later schedules fail as cancelled.
    pub fn shutdown(&self) {
        self.inner.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl<C: AsyncHttpClient> TileScheduler for FetchPipeline<C> {
    fn schedule(&self, tile: Arc<Tile>) {
        if !tile.begin_loading() {
            return;
        }
        if self.inner.shutdown.is_cancelled() {
            tile.complete(Err(TileError::Cancelled));
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            inner.load(tile).await;
        });
    }

    fn shutdown(&self) {
        self.inner.cancel();
    }
}

impl<C: AsyncHttpClient> Drop for FetchPipeline<C> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl<C: AsyncHttpClient> PipelineInner<C> {
    fn cancel(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Fetch pipeline shutting down");
            self.shutdown.cancel();
        }
    }

    #[instrument(skip_all, fields(tile = %tile.key()))]
    async fn load(&self, tile: Arc<Tile>) {
        self.metrics.fetch_started();

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(TileError::Cancelled),
            result = self.fetch_and_decode(&tile) => result,
        };

        match &result {
            Ok(_) => self.metrics.fetch_succeeded(),
            Err(TileError::Cancelled) => self.metrics.fetch_cancelled(),
            Err(e) => {
                self.metrics.fetch_failed();
                debug!(error = %e, "Tile load failed");
            }
        }
        tile.complete(result);
    }

    async fn fetch_and_decode(&self, tile: &Tile) -> Result<TileData, TileError> {
        let key = tile.key();
        let layer = self
            .providers
            .layer(key.layer())
            .ok_or_else(|| {
                self.configuration_error(key, ProviderError::UnknownLayer(key.layer().to_string()))
            })?;

        if !key.is_in_range() || !layer.supports_zoom(key.zoom()) {
            return Err(TileError::Configuration(format!(
                "tile {} outside layer zoom range {}..={}",
                key,
                layer.min_zoom(),
                layer.max_zoom()
            )));
        }

        if let Some(bytes) = self.read_disk(key).await {
            match self.decode_attached(tile, layer.content(), bytes).await {
                Err(TileError::Decode(reason)) => {
                    warn!(
                        tile = %key,
                        reason = %reason,
                        "Unreadable disk entry; fetching again"
                    );
                    self.remove_disk(key).await;
                }
                result => return result,
            }
        }

        let url = layer
            .tile_url(key, self.resolver.as_deref(), self.providers.as_ref())
            .map_err(|e| self.configuration_error(key, e))?;
        let bytes = self.download(&url).await?;
        let data = self.decode_attached(tile, layer.content(), bytes.clone()).await?;
        self.write_disk(key, &bytes).await;
        Ok(data)
    }

    /// Park the payload on the tile and decode it from there. A tile that
    /// was evicted meanwhile refuses the payload and is not decoded.
    async fn decode_attached(
        &self,
        tile: &Tile,
        content: ContentType,
        bytes: Bytes,
    ) -> Result<TileData, TileError> {
        tile.attach_raw(bytes);
        let raw = tile.take_raw().ok_or(TileError::Cancelled)?;
        self.decode(content, raw).await
    }

    async fn download(&self, url: &str) -> Result<Bytes, TileError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TileError::Cancelled)?;

        let started = Instant::now();
        let bytes = self.client.get(url).await.map_err(|e| {
            if e.is_configuration() {
                TileError::Configuration(e.to_string())
            } else {
                TileError::Network(e.to_string())
            }
        })?;
        self.metrics.bytes_downloaded(bytes.len(), started.elapsed());
        debug!(url, bytes = bytes.len(), "Tile downloaded");
        Ok(bytes)
    }

    async fn decode(&self, content: ContentType, bytes: Bytes) -> Result<TileData, TileError> {
        let started = Instant::now();
        let data = tokio::task::spawn_blocking(move || decode_tile(content, &bytes))
            .await
            .map_err(|e| TileError::Decode(format!("decode task failed: {}", e)))??;
        self.metrics.decode_time(started.elapsed());
        Ok(data)
    }

    async fn read_disk(&self, key: &TileKey) -> Option<Bytes> {
        let disk = self.disk.as_ref()?;
        match disk.get(key).await {
            Ok(Some(bytes)) => {
                self.metrics.disk_hit();
                Some(bytes)
            }
            Ok(None) => {
                self.metrics.disk_miss();
                None
            }
            Err(e) => {
                warn!(tile = %key, error = %e, "Disk store read failed");
                self.metrics.disk_miss();
                None
            }
        }
    }

    async fn remove_disk(&self, key: &TileKey) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.remove(key).await {
                warn!(tile = %key, error = %e, "Disk store remove failed");
            }
        }
    }

    async fn write_disk(&self, key: &TileKey, bytes: &[u8]) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.put(key, bytes).await {
                warn!(tile = %key, error = %e, "Disk store write failed");
            }
        }
    }

    /// Convert a provider problem into a permanent tile error, logging it
    /// once per layer.
    fn configuration_error(&self, key: &TileKey, error: ProviderError) -> TileError {
        if self.reported_layers.insert(key.layer().to_string()) {
            warn!(
                layer = key.layer(),
                error = %error,
                "Layer misconfigured; its tiles will not load"
            );
        } else {
            debug!(tile = %key, error = %error, "Layer misconfigured");
        }
        TileError::Configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, TileCache};
    use crate::provider::{LayerSource, MockAsyncHttpClient, StaticProviders};
    use crate::tile::TileStatus;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png() -> Bytes {
        let img = RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        Bytes::from(out.into_inner())
    }

    fn providers() -> Arc<dyn ProviderRegistry> {
        Arc::new(
            StaticProviders::new()
                .without_env_fallback()
                .with_layer(
                    LayerSource::new("osm", "https://t.test/{z}/{x}/{y}.png", ContentType::Raster)
                        .unwrap(),
                )
                .with_layer(
                    LayerSource::new(
                        "secure",
                        "https://s.test/{z}/{x}/{y}?key={api_key}",
                        ContentType::Raster,
                    )
                    .unwrap()
                    .with_credentials(["api_key"]),
                )
                .with_layer(
                    LayerSource::new("low", "https://l.test/{z}/{x}/{y}", ContentType::Raster)
                        .unwrap()
                        .with_zoom_range(0, 4),
                ),
        )
    }

    fn pipeline(client: MockAsyncHttpClient) -> FetchPipeline<MockAsyncHttpClient> {
        FetchPipeline::builder(client, providers(), Handle::current()).build()
    }

    async fn load(pipeline: &FetchPipeline<MockAsyncHttpClient>, key: TileKey) -> Arc<Tile> {
        let tile = Arc::new(Tile::new(key));
        pipeline.schedule(Arc::clone(&tile));
        tile.wait_terminal().await;
        tile
    }

    #[tokio::test]
    async fn test_successful_raster_load() {
        let client = MockAsyncHttpClient::new(Ok(png()));
        let pipeline = pipeline(client.clone());

        let tile = load(&pipeline, TileKey::new(3, 5, 7, "osm")).await;

        assert_eq!(tile.status(), TileStatus::Loaded);
        let data = tile.data().unwrap();
        assert_eq!(data.as_raster().unwrap().dimensions(), (8, 8));
        assert_eq!(client.urls.lock().as_slice(), ["https://t.test/7/3/5.png"]);

        let snapshot = pipeline.metrics().snapshot();
        assert_eq!(snapshot.fetches_succeeded, 1);
        assert_eq!(snapshot.bytes_downloaded, png().len() as u64);
    }

    #[tokio::test]
    async fn test_network_failure() {
        let client = MockAsyncHttpClient::new(Err(ProviderError::HttpStatus {
            status: 503,
            url: "https://t.test/1/0/0.png".to_string(),
        }));
        let pipeline = pipeline(client);

        let tile = load(&pipeline, TileKey::new(0, 0, 1, "osm")).await;

        assert!(matches!(tile.status(), TileStatus::Error(TileError::Network(_))));
        assert_eq!(pipeline.metrics().snapshot().fetches_failed, 1);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_decode_error() {
        let client = MockAsyncHttpClient::new(Ok(Bytes::from_static(b"<html>oops</html>")));
        let pipeline = pipeline(client);

        let tile = load(&pipeline, TileKey::new(0, 0, 1, "osm")).await;

        assert!(matches!(tile.status(), TileStatus::Error(TileError::Decode(_))));
        assert!(tile.data().is_none());
    }

    #[tokio::test]
    async fn test_unknown_layer_never_hits_network() {
        let client = MockAsyncHttpClient::new(Ok(png()));
        let pipeline = pipeline(client.clone());

        let first = load(&pipeline, TileKey::new(0, 0, 1, "nope")).await;
        let second = load(&pipeline, TileKey::new(1, 0, 1, "nope")).await;

        for tile in [first, second] {
            let status = tile.status();
            assert!(matches!(status, TileStatus::Error(TileError::Configuration(_))));
        }
        assert_eq!(client.call_count(), 0);
        assert_eq!(pipeline.inner.reported_layers.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_is_configuration_error() {
        let client = MockAsyncHttpClient::new(Ok(png()));
        let pipeline = pipeline(client.clone());

        let tile = load(&pipeline, TileKey::new(0, 0, 1, "secure")).await;

        assert!(matches!(
            tile.status(),
            TileStatus::Error(TileError::Configuration(_))
        ));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_token_resolver_supplies_credential() {
        let client = MockAsyncHttpClient::new(Ok(png()));
        let resolver: Arc<dyn TokenResolver> = Arc::new(|token: &str, _key: &TileKey| {
            (token == "api_key").then(|| "s3cret".to_string())
        });
        let pipeline = FetchPipeline::builder(client.clone(), providers(), Handle::current())
            .token_resolver(resolver)
            .build();

        let tile = load(&pipeline, TileKey::new(1, 1, 2, "secure")).await;

        assert_eq!(tile.status(), TileStatus::Loaded);
        assert_eq!(
            client.urls.lock().as_slice(),
            ["https://s.test/2/1/1?key=s3cret"]
        );
    }

    #[tokio::test]
    async fn test_zoom_outside_layer_range() {
        let client = MockAsyncHttpClient::new(Ok(png()));
        let pipeline = pipeline(client.clone());

        let tile = load(&pipeline, TileKey::new(0, 0, 9, "low")).await;

        assert!(matches!(
            tile.status(),
            TileStatus::Error(TileError::Configuration(_))
        ));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_disk_store_write_through_and_hit() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskTileStore::open(dir.path()).await.unwrap());
        let key = TileKey::new(2, 3, 4, "osm");

        let online = MockAsyncHttpClient::new(Ok(png()));
        let first = FetchPipeline::builder(online.clone(), providers(), Handle::current())
            .disk_store(Arc::clone(&disk))
            .build();
        assert_eq!(load(&first, key.clone()).await.status(), TileStatus::Loaded);
        assert_eq!(online.call_count(), 1);
        assert!(disk.get(&key).await.unwrap().is_some());

        let offline = MockAsyncHttpClient::new(Err(ProviderError::HttpError("offline".into())));
        let second = FetchPipeline::builder(offline.clone(), providers(), Handle::current())
            .disk_store(Arc::clone(&disk))
            .build();
        assert_eq!(load(&second, key).await.status(), TileStatus::Loaded);
        assert_eq!(offline.call_count(), 0);
        assert_eq!(second.metrics().snapshot().disk_hits, 1);
    }

    #[tokio::test]
    async fn test_failed_decode_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskTileStore::open(dir.path()).await.unwrap());
        let key = TileKey::new(0, 0, 1, "osm");

        let client = MockAsyncHttpClient::new(Ok(Bytes::from_static(b"garbage")));
        let pipeline = FetchPipeline::builder(client, providers(), Handle::current())
            .disk_store(Arc::clone(&disk))
            .build();
        load(&pipeline, key.clone()).await;

        assert!(disk.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_is_refetched() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskTileStore::open(dir.path()).await.unwrap());
        let key = TileKey::new(1, 2, 3, "osm");
        disk.put(&key, b"garbage").await.unwrap();

        let client = MockAsyncHttpClient::new(Ok(png()));
        let pipeline = FetchPipeline::builder(client.clone(), providers(), Handle::current())
            .disk_store(Arc::clone(&disk))
            .build();
        let tile = load(&pipeline, key.clone()).await;

        assert_eq!(tile.status(), TileStatus::Loaded);
        assert_eq!(client.call_count(), 1);
        assert_eq!(disk.get(&key).await.unwrap(), Some(png()));

        // The repaired entry serves the next load without the network
        let again = load(&pipeline, key).await;
        assert_eq!(again.status(), TileStatus::Loaded);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let (client, gate) = MockAsyncHttpClient::gated(Ok(png()));
        let pipeline = Arc::new(pipeline(client.clone()));
        let cache = TileCache::new(pipeline, CacheConfig::default());
        let key = TileKey::new(1, 1, 3, "osm");

        let a = cache.request_tile(&key);
        let b = cache.request_tile(&key);
        assert!(Arc::ptr_eq(&a, &b));

        gate.notify_one();
        a.wait_terminal().await;

        assert_eq!(b.status(), TileStatus::Loaded);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_eviction_mid_flight_discards_result() {
        let (client, gate) = MockAsyncHttpClient::gated(Ok(png()));
        let pipeline = Arc::new(pipeline(client));
        let cache = TileCache::new(pipeline, CacheConfig::default());
        let key = TileKey::new(0, 0, 2, "osm");

        let tile = cache.request_tile(&key);
        assert_eq!(tile.status(), TileStatus::Loading);
        assert_eq!(cache.invalidate(|_| true), 1);
        assert!(!cache.contains(&key));

        let mut statuses = tile.watch();
        gate.notify_one();
        while !matches!(*statuses.borrow_and_update(), TileStatus::Disposed) {
            statuses.changed().await.unwrap();
        }
        assert!(tile.data().is_none());
    }

    #[tokio::test]
    async fn test_refetch_starts_after_evicted_fetch_ends() {
        let (client, gate) = MockAsyncHttpClient::gated(Ok(png()));
        let pipeline = Arc::new(pipeline(client.clone()));
        let cache = TileCache::new(pipeline, CacheConfig::default());
        let key = TileKey::new(1, 0, 2, "osm");

        let old = cache.request_tile(&key);
        cache.invalidate(|_| true);
        let fresh = cache.request_tile(&key);
        assert_eq!(fresh.status(), TileStatus::Queued);

        let mut statuses = fresh.watch();
        gate.notify_one();
        while !matches!(*statuses.borrow_and_update(), TileStatus::Loading) {
            statuses.changed().await.unwrap();
        }
        assert_eq!(old.status(), TileStatus::Disposed);

        gate.notify_one();
        assert_eq!(fresh.wait_terminal().await, TileStatus::Loaded);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_fetch() {
        let (client, _gate) = MockAsyncHttpClient::gated(Ok(png()));
        let pipeline = pipeline(client);
        let tile = Arc::new(Tile::new(TileKey::new(0, 0, 1, "osm")));

        pipeline.schedule(Arc::clone(&tile));
        tokio::task::yield_now().await;
        pipeline.shutdown();

        assert_eq!(
            tile.wait_terminal().await,
            TileStatus::Error(TileError::Cancelled)
        );
        assert!(pipeline.is_shut_down());

        let late = Arc::new(Tile::new(TileKey::new(1, 0, 1, "osm")));
        pipeline.schedule(Arc::clone(&late));
        assert_eq!(late.status(), TileStatus::Error(TileError::Cancelled));
    }

    #[test]
    fn test_fetch_config_builders() {
        let config = FetchConfig::default()
            .with_max_concurrent(0)
            .with_timeout(Duration::from_secs(5))
            .with_user_agent("test/1.0");
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "test/1.0");
    }
}
