//! Render command - draw a view headlessly and write it out.
//!
//! ```text
//! config + flags ──► view, layers, overlays
//!                        │
//!      FetchPipeline ◄── TileCache ◄── MapContext::frame (every 16 ms)
//!                                          │
//!                  covered or deadline ──► PNG / display-list summary
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use tessera::cache::{DiskTileStore, TileCache};
use tessera::config::ConfigFile;
use tessera::drawer::{PixelBackend, RenderBackend, VectorBackend};
use tessera::fetch::FetchPipeline;
use tessera::map::FrameReport;
use tessera::overlay::{Marker, Overlays};
use tessera::provider::{AsyncReqwestClient, ProviderRegistry};
use tessera::telemetry::EngineMetrics;
use tessera::{GeoPoint, MapContext, ViewState};

use super::common::{parse_lat_lon, resolve_layers, resolve_view, BackendKind, ViewArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Time between frames while tiles are loading.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Arguments for the render command.
#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Center latitude in degrees [default: from config]
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Center longitude in degrees [default: from config]
    #[arg(long, allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Zoom level 0-23 [default: from config]
    #[arg(long)]
    pub zoom: Option<u8>,

    /// Surface width in pixels [default: from config]
    #[arg(long)]
    pub width: Option<u32>,

    /// Surface height in pixels [default: from config]
    #[arg(long)]
    pub height: Option<u32>,

    /// Comma-separated layer ids, bottom first [default: all configured]
    #[arg(long, value_delimiter = ',')]
    pub layers: Vec<String>,

    /// Output PNG path (pixel backend)
    #[arg(long, short, default_value = "map.png")]
    pub output: PathBuf,

    /// Render backend
    #[arg(long, value_enum, default_value = "pixel")]
    pub backend: BackendKind,

    /// Seconds to wait for tiles before writing whatever has loaded
    #[arg(long, default_value = "30")]
    pub deadline: u64,

    /// Skip the on-disk tile store for this run
    #[arg(long)]
    pub no_disk: bool,

    /// Place a marker at LAT,LON (repeatable)
    #[arg(long = "marker", value_parser = parse_lat_lon, allow_hyphen_values = true)]
    pub markers: Vec<GeoPoint>,
}

impl RenderArgs {
    fn view_args(&self) -> ViewArgs {
        ViewArgs {
            lat: self.lat,
            lon: self.lon,
            zoom: self.zoom,
            width: self.width,
            height: self.height,
        }
    }
}

/// Run the render command.
pub fn run(args: RenderArgs) -> Result<(), CliError> {
    let runner = CliRunner::new()?;
    runner.log_startup("render");
    let config = runner.config();

    let view = resolve_view(&args.view_args(), config)?;
    let layers = resolve_layers(&args.layers, config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tessera-worker")
        .build()
        .map_err(|e| CliError::Startup(format!("async runtime: {}", e)))?;
    runtime.block_on(render(&args, config, view, layers))
}

async fn render(
    args: &RenderArgs,
    config: &ConfigFile,
    view: ViewState,
    layers: Vec<String>,
) -> Result<(), CliError> {
    let fetch = config.fetch_config();
    let client = AsyncReqwestClient::with_config(fetch.timeout.as_secs(), &fetch.user_agent)?;
    let providers: Arc<dyn ProviderRegistry> = Arc::new(config.providers()?);
    let metrics = Arc::new(EngineMetrics::new());

    let mut builder = FetchPipeline::builder(client, providers, Handle::current())
        .config(fetch)
        .metrics(Arc::clone(&metrics));
    if config.cache.disk_enabled && !args.no_disk {
        let disk = DiskTileStore::open(config.cache.disk_directory.clone()).await?;
        builder = builder.disk_store(Arc::new(disk));
    }
    let pipeline = Arc::new(builder.build());
    let cache = Arc::new(
        TileCache::new(pipeline, config.cache_config()).with_metrics(Arc::clone(&metrics)),
    );

    let mut overlays = Overlays::new();
    for point in &args.markers {
        overlays.markers.create(Marker::new(*point));
    }

    let center = view.center_geo();
    info!(
        lat = center.lat(),
        lon = center.lon(),
        zoom = view.zoom(),
        width = view.width(),
        height = view.height(),
        layers = ?layers,
        "Rendering view"
    );

    let deadline = Duration::from_secs(args.deadline);
    match args.backend {
        BackendKind::Pixel => {
            let mut map =
                MapContext::new(view, cache, layers, PixelBackend::new()).with_overlays(overlays);
            map.initialize()?;
            let report = drive(&mut map, deadline).await?;

            let png = map.backend().encode_png()?;
            std::fs::write(&args.output, png).map_err(|e| CliError::FileWrite {
                path: args.output.display().to_string(),
                error: e.to_string(),
            })?;
            println!(
                "Wrote {} ({} tiles drawn, {} missing, {} markers)",
                args.output.display(),
                report.draw.tiles_drawn,
                report.draw.tiles_missing,
                report.elements
            );
            map.dispose();
        }
        BackendKind::Vector => {
            let mut map =
                MapContext::new(view, cache, layers, VectorBackend::new()).with_overlays(overlays);
            map.initialize()?;
            let report = drive(&mut map, deadline).await?;

            let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
            for item in map.backend().items() {
                *kinds.entry(format!("{:?}", item.kind)).or_default() += 1;
            }
            println!(
                "Collected {} display items from {} vector tiles ({} raster tiles skipped)",
                map.backend().items().len(),
                report.draw.tiles_drawn,
                report.draw.tiles_skipped
            );
            for (kind, count) in kinds {
                println!("  {:<12} {}", kind, count);
            }
            map.dispose();
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        fetched = snapshot.fetches_succeeded,
        failed = snapshot.fetches_failed,
        disk_hits = snapshot.disk_hits,
        bytes = snapshot.bytes_downloaded,
        "Render finished"
    );
    println!();
    print!("{}", snapshot);
    Ok(())
}

/// Run frames until every needed tile is loaded or failed, or until
/// `deadline` passes, then redraw once more with whatever is loaded.
async fn drive<B: RenderBackend>(
    map: &mut MapContext<B>,
    deadline: Duration,
) -> Result<FrameReport, CliError> {
    let started = Instant::now();
    let mut interval = tokio::time::interval(FRAME_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let report = map.frame()?;
        if report.is_settled() {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Viewport covered"
            );
            break;
        }
        if started.elapsed() >= deadline {
            warn!(
                pending = report.pending,
                deadline_secs = deadline.as_secs(),
                "Deadline reached with tiles still loading"
            );
            break;
        }
    }

    // Completions can race the coverage check; draw the final state
    map.request_redraw();
    Ok(map.frame()?)
}
