//! Off-screen RGBA backend built on tiny-skia.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};

use image::RgbaImage;
use tiny_skia::{
    Color, ColorU8, FillRule, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke,
    Transform,
};
use tracing::debug;

use super::{
    surface_hit, Bounds, DrawContext, DrawStats, DrawerError, DrawerState, Ray, RaycastHit,
    RenderBackend,
};
use crate::coord::TILE_SIZE;
use crate::overlay::{Drawing, DrawingKind, Marker};
use crate::tile::{TileData, TileKey};
use crate::view::ViewState;

/// Fully transparent.
pub const DEFAULT_BACKGROUND: [u8; 4] = [0, 0, 0, 0];

/// Premultiplied copy of a raster tile, valid while its source lives.
struct Texture {
    source: Weak<TileData>,
    pixmap: Pixmap,
}

/// Composites raster tiles and overlays into an RGBA surface.
pub struct PixelBackend {
    state: DrawerState,
    surface: Option<Pixmap>,
    background: [u8; 4],
    textures: HashMap<TileKey, Texture>,
    /// Set by the first draw since initialization.
    drawn: bool,
}

impl Default for PixelBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelBackend {
    pub fn new() -> Self {
        Self {
            state: DrawerState::Uninitialized,
            surface: None,
            background: DEFAULT_BACKGROUND,
            textures: HashMap::new(),
            drawn: false,
        }
    }

    /// Straight-alpha RGBA that fills areas without a loaded tile.
    pub fn with_background(mut self, background: [u8; 4]) -> Self {
        self.background = background;
        self
    }

    /// Surface width and height, once initialized.
    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.surface.as_ref().map(|s| (s.width(), s.height()))
    }

    /// Straight-alpha RGBA at a surface pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let c = self.surface.as_ref()?.pixel(x, y)?.demultiply();
        Some([c.red(), c.green(), c.blue(), c.alpha()])
    }

    /// Number of tile textures currently held.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, DrawerError> {
        self.state.ensure_ready()?;
        let surface = self.surface.as_ref().ok_or(DrawerError::NotInitialized)?;
        surface
            .encode_png()
            .map_err(|e| DrawerError::Surface(format!("PNG encoding failed: {}", e)))
    }

    pub fn save_png(&self, path: &Path) -> Result<(), DrawerError> {
        let png = self.encode_png()?;
        std::fs::write(path, png)
            .map_err(|e| DrawerError::Surface(format!("{}: {}", path.display(), e)))
    }

    fn ensure_surface(&mut self, width: u32, height: u32) -> Result<(), DrawerError> {
        if self.surface_size() == Some((width, height)) {
            return Ok(());
        }
        let pixmap = Pixmap::new(width, height).ok_or_else(|| {
            DrawerError::Surface(format!("cannot allocate {}x{} surface", width, height))
        })?;
        self.surface = Some(pixmap);
        Ok(())
    }
}

impl RenderBackend for PixelBackend {
    fn name(&self) -> &'static str {
        "pixel"
    }

    fn state(&self) -> DrawerState {
        self.state
    }

    fn initialize(&mut self, width: u32, height: u32) -> Result<(), DrawerError> {
        if self.state == DrawerState::Disposed {
            return Err(DrawerError::Disposed);
        }
        self.ensure_surface(width, height)?;
        self.state = DrawerState::Initialized;
        self.drawn = false;
        debug!(width, height, "Pixel backend initialized");
        Ok(())
    }

    fn draw(&mut self, ctx: &DrawContext<'_>) -> Result<DrawStats, DrawerError> {
        self.state.ensure_ready()?;
        self.ensure_surface(ctx.view.width(), ctx.view.height())?;

        let Self {
            surface,
            textures,
            background,
            ..
        } = self;
        let surface = surface.as_mut().ok_or(DrawerError::NotInitialized)?;
        let [r, g, b, a] = *background;
        surface.fill(Color::from_rgba8(r, g, b, a));

        let mut stats = DrawStats::default();
        let mut used = HashSet::new();
        for layer in ctx.layers {
            for placement in ctx.view.placements(layer) {
                let Some(data) = ctx.cache.get(&placement.key).and_then(|t| t.data()) else {
                    stats.tiles_missing += 1;
                    continue;
                };
                let Some(image) = data.as_raster() else {
                    stats.tiles_skipped += 1;
                    continue;
                };

                let current = textures
                    .get(&placement.key)
                    .is_some_and(|t| std::ptr::eq(t.source.as_ptr(), Arc::as_ptr(&data)));
                if !current {
                    let Some(pixmap) = texture_from_image(image) else {
                        stats.tiles_skipped += 1;
                        continue;
                    };
                    textures.insert(
                        placement.key.clone(),
                        Texture {
                            source: Arc::downgrade(&data),
                            pixmap,
                        },
                    );
                }
                if let Some(texture) = textures.get(&placement.key) {
                    blit(surface, &texture.pixmap, placement.x, placement.y);
                    stats.tiles_drawn += 1;
                }
                used.insert(placement.key);
            }
        }

        textures.retain(|key, _| used.contains(key));
        self.drawn = true;
        Ok(stats)
    }

    fn draw_elements(&mut self, ctx: &DrawContext<'_>) -> Result<usize, DrawerError> {
        self.state.ensure_ready()?;
        let surface = self.surface.as_mut().ok_or(DrawerError::NotInitialized)?;

        let mut drawn = 0;
        for drawing in ctx.overlays.drawings.iter().filter(|d| d.visible) {
            if paint_drawing(surface, ctx.view, drawing) {
                drawn += 1;
            }
        }
        for marker in ctx.overlays.markers.iter().filter(|m| m.visible) {
            if paint_marker(surface, ctx.view, marker) {
                drawn += 1;
            }
        }
        self.drawn = true;
        Ok(drawn)
    }

    fn raycast(
        &self,
        ctx: &DrawContext<'_>,
        ray: &Ray,
        max_distance: f64,
    ) -> Result<Option<RaycastHit>, DrawerError> {
        self.state.ensure_ready()?;
        if !self.drawn {
            return Ok(None);
        }
        let bounds = self.surface_size().map(|(w, h)| {
            let mut b = Bounds::from_point(0.0, 0.0);
            b.include(w as f64, h as f64);
            b
        });
        Ok(surface_hit(ctx, ray, max_distance, bounds))
    }

    fn dispose(&mut self) {
        if self.state == DrawerState::Disposed {
            return;
        }
        self.surface = None;
        self.textures.clear();
        self.drawn = false;
        self.state = DrawerState::Disposed;
        debug!("Pixel backend disposed");
    }
}

fn texture_from_image(image: &RgbaImage) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(image.width(), image.height())?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Some(pixmap)
}

/// Draw a tile texture with its top-left corner at `(x, y)`, scaled to one
/// tile.
fn blit(surface: &mut Pixmap, texture: &Pixmap, x: f64, y: f64) {
    let (x, y) = (x.round(), y.round());
    if texture.width() == TILE_SIZE && texture.height() == TILE_SIZE {
        surface.draw_pixmap(
            x as i32,
            y as i32,
            texture.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        return;
    }
    let sx = TILE_SIZE as f32 / texture.width() as f32;
    let sy = TILE_SIZE as f32 / texture.height() as f32;
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    surface.draw_pixmap(
        0,
        0,
        texture.as_ref(),
        &paint,
        Transform::from_row(sx, 0.0, 0.0, sy, x as f32, y as f32),
        None,
    );
}

fn solid(color: [u8; 4]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    paint.anti_alias = true;
    paint
}

fn paint_marker(surface: &mut Pixmap, view: &ViewState, marker: &Marker) -> bool {
    let (x, y) = view.geo_to_pixel(marker.position);
    let Some(path) = PathBuilder::from_circle(x as f32, y as f32, marker.radius) else {
        return false;
    };
    surface.fill_path(
        &path,
        &solid(marker.color),
        FillRule::Winding,
        Transform::identity(),
        None,
    );
    true
}

fn paint_drawing(surface: &mut Pixmap, view: &ViewState, drawing: &Drawing) -> bool {
    let points = drawing.screen_points(view);
    let mut iter = points.iter();
    let Some(&(x0, y0)) = iter.next() else {
        return false;
    };

    let mut builder = PathBuilder::new();
    builder.move_to(x0 as f32, y0 as f32);
    for &(x, y) in iter {
        builder.line_to(x as f32, y as f32);
    }
    if drawing.kind == DrawingKind::Polygon {
        builder.close();
    }
    let Some(path) = builder.finish() else {
        return false;
    };

    if let (DrawingKind::Polygon, Some(fill)) = (drawing.kind, drawing.fill) {
        surface.fill_path(
            &path,
            &solid(fill),
            FillRule::EvenOdd,
            Transform::identity(),
            None,
        );
    }
    if drawing.width > 0.0 {
        let stroke = Stroke {
            width: drawing.width,
            ..Stroke::default()
        };
        surface.stroke_path(
            &path,
            &solid(drawing.stroke),
            &stroke,
            Transform::identity(),
            None,
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, NullScheduler, PreloadedScheduler, TileCache};
    use crate::coord::{GeoPoint, TilePoint};
    use crate::overlay::{ElementKind, Overlays};
    use image::Rgba;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn solid_tile(color: [u8; 4], side: u32) -> TileData {
        TileData::Raster(RgbaImage::from_pixel(side, side, Rgba(color)))
    }

    /// Zoom-1 world shown exactly: tile (x, y) lands at (256x, 256y).
    fn world_view() -> ViewState {
        ViewState::new(TilePoint::new(1.0, 1.0), 1, 512, 512)
    }

    fn layers() -> Vec<String> {
        vec!["osm".to_string()]
    }

    fn ctx<'a>(
        view: &'a ViewState,
        cache: &'a TileCache,
        layers: &'a [String],
        overlays: &'a Overlays,
    ) -> DrawContext<'a> {
        DrawContext {
            view,
            cache,
            layers,
            overlays,
        }
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut backend = PixelBackend::new();
        backend.dispose();
        backend.dispose();
        assert_eq!(backend.state(), DrawerState::Disposed);
        assert_eq!(backend.initialize(10, 10), Err(DrawerError::Disposed));

        let mut backend = PixelBackend::new();
        backend.initialize(10, 10).unwrap();
        backend.dispose();
        backend.dispose();
        assert_eq!(backend.surface_size(), None);
    }

    #[test]
    fn test_draw_requires_initialized_backend() {
        let cache = TileCache::new(Arc::new(NullScheduler), CacheConfig::default());
        let (view, layers, overlays) = (world_view(), layers(), Overlays::new());
        let ctx = ctx(&view, &cache, &layers, &overlays);

        let mut backend = PixelBackend::new();
        assert_eq!(backend.draw(&ctx), Err(DrawerError::NotInitialized));
        backend.initialize(512, 512).unwrap();
        backend.dispose();
        assert_eq!(backend.draw(&ctx), Err(DrawerError::Disposed));
        assert_eq!(backend.draw_elements(&ctx), Err(DrawerError::Disposed));
        assert!(backend
            .raycast(&ctx, &Ray::from_screen(1.0, 1.0), 10.0)
            .is_err());
    }

    #[test]
    fn test_partial_coverage_composites_loaded_tiles_only() {
        let a = TileKey::new(0, 0, 1, "osm");
        let c = TileKey::new(1, 1, 1, "osm");
        let scheduler = PreloadedScheduler::default()
            .with(a.clone(), solid_tile(RED, 256))
            .with(c.clone(), solid_tile(BLUE, 256));
        let cache = TileCache::new(Arc::new(scheduler), CacheConfig::default());
        cache.request_tile(&a);
        cache.request_tile(&c);

        let (view, layers, overlays) = (world_view(), layers(), Overlays::new());
        let mut backend = PixelBackend::new();
        backend.initialize(512, 512).unwrap();
        let stats = backend.draw(&ctx(&view, &cache, &layers, &overlays)).unwrap();

        // The margin wraps horizontally, so each loaded tile lands twice
        assert_eq!(stats.tiles_drawn, 4);
        assert_eq!(stats.tiles_missing, 4);
        assert_eq!(backend.pixel(10, 10), Some(RED));
        assert_eq!(backend.pixel(300, 300), Some(BLUE));
        assert_eq!(backend.pixel(300, 10), Some(DEFAULT_BACKGROUND));
        assert_eq!(backend.pixel(10, 300), Some(DEFAULT_BACKGROUND));
        assert_eq!(backend.texture_count(), 2);
    }

    #[test]
    fn test_failed_tile_is_treated_as_missing() {
        let cache = TileCache::new(
            Arc::new(PreloadedScheduler::default()),
            CacheConfig::default(),
        );
        let key = TileKey::new(0, 0, 1, "osm");
        cache.request_tile(&key);
        assert!(cache.get(&key).unwrap().status().is_error());

        let (view, layers, overlays) = (world_view(), layers(), Overlays::new());
        let mut backend = PixelBackend::new().with_background([9, 9, 9, 255]);
        backend.initialize(512, 512).unwrap();
        let stats = backend.draw(&ctx(&view, &cache, &layers, &overlays)).unwrap();

        assert_eq!(stats.tiles_drawn, 0);
        assert_eq!(backend.pixel(10, 10), Some([9, 9, 9, 255]));
    }

    #[test]
    fn test_small_tiles_are_scaled_up() {
        let key = TileKey::new(0, 0, 1, "osm");
        let scheduler = PreloadedScheduler::default().with(key.clone(), solid_tile(RED, 64));
        let cache = TileCache::new(Arc::new(scheduler), CacheConfig::default());
        cache.request_tile(&key);

        let (view, layers, overlays) = (world_view(), layers(), Overlays::new());
        let mut backend = PixelBackend::new();
        backend.initialize(512, 512).unwrap();
        backend.draw(&ctx(&view, &cache, &layers, &overlays)).unwrap();

        let [r, g, b, a] = backend.pixel(128, 128).unwrap();
        assert!(r >= 250 && g <= 5 && b <= 5 && a >= 250);
        assert_eq!(backend.pixel(300, 300), Some(DEFAULT_BACKGROUND));
    }

    #[test]
    fn test_textures_released_after_eviction() {
        let key = TileKey::new(0, 0, 1, "osm");
        let scheduler = PreloadedScheduler::default().with(key.clone(), solid_tile(RED, 256));
        let cache = TileCache::new(Arc::new(scheduler), CacheConfig::default());
        cache.request_tile(&key);

        let (view, layers, overlays) = (world_view(), layers(), Overlays::new());
        let mut backend = PixelBackend::new();
        backend.initialize(512, 512).unwrap();
        backend.draw(&ctx(&view, &cache, &layers, &overlays)).unwrap();
        assert_eq!(backend.texture_count(), 1);

        cache.invalidate(|_| true);
        backend.draw(&ctx(&view, &cache, &layers, &overlays)).unwrap();
        assert_eq!(backend.texture_count(), 0);
    }

    #[test]
    fn test_elements_and_marker_raycast() {
        let cache = TileCache::new(Arc::new(NullScheduler), CacheConfig::default());
        let view = ViewState::from_geo(GeoPoint::new(2.35, 48.85), 10, 200, 100);
        let layers = layers();
        let mut overlays = Overlays::new();
        overlays
            .markers
            .create(Marker::new(GeoPoint::new(2.35, 48.85)).with_color(BLUE));

        let mut backend = PixelBackend::new();
        backend.initialize(200, 100).unwrap();
        let ctx = ctx(&view, &cache, &layers, &overlays);
        backend.draw(&ctx).unwrap();
        assert_eq!(backend.draw_elements(&ctx).unwrap(), 1);
        assert_eq!(backend.pixel(100, 50), Some(BLUE));

        let hit = backend
            .raycast(&ctx, &Ray::from_screen(101.0, 50.0), 10.0)
            .unwrap()
            .unwrap();
        let element = hit.element.unwrap();
        assert_eq!(element.kind, ElementKind::Marker);
        assert_eq!(element.index, 0);
        assert!((hit.geo.lon() - 2.35).abs() < 0.01);

        let miss = backend
            .raycast(&ctx, &Ray::from_screen(150.0, 20.0), 10.0)
            .unwrap()
            .unwrap();
        assert!(miss.element.is_none());

        assert!(backend
            .raycast(&ctx, &Ray::from_screen(500.0, 500.0), 10.0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_raycast_misses_until_first_draw() {
        let cache = TileCache::new(Arc::new(NullScheduler), CacheConfig::default());
        let view = ViewState::from_geo(GeoPoint::new(0.0, 0.0), 3, 512, 512);
        let layers = layers();
        let mut overlays = Overlays::new();
        overlays.markers.create(Marker::new(GeoPoint::new(0.0, 0.0)));
        let ctx = ctx(&view, &cache, &layers, &overlays);

        let mut backend = PixelBackend::new();
        backend.initialize(512, 512).unwrap();
        assert_eq!(
            backend.raycast(&ctx, &Ray::from_screen(10.0, 10.0), 10.0),
            Ok(None)
        );
        assert_eq!(
            backend.raycast(&ctx, &Ray::from_screen(256.0, 256.0), 10.0),
            Ok(None)
        );

        backend.draw(&ctx).unwrap();
        assert!(backend
            .raycast(&ctx, &Ray::from_screen(10.0, 10.0), 10.0)
            .unwrap()
            .is_some());

        // Re-initializing starts over without drawn content
        backend.initialize(512, 512).unwrap();
        assert_eq!(
            backend.raycast(&ctx, &Ray::from_screen(10.0, 10.0), 10.0),
            Ok(None)
        );
    }

    #[test]
    fn test_png_export() {
        let cache = TileCache::new(Arc::new(NullScheduler), CacheConfig::default());
        let (view, layers, overlays) = (world_view(), layers(), Overlays::new());
        let mut backend = PixelBackend::new().with_background([1, 2, 3, 255]);
        assert!(backend.encode_png().is_err());

        backend.initialize(512, 512).unwrap();
        backend.draw(&ctx(&view, &cache, &layers, &overlays)).unwrap();
        let png = backend.encode_png().unwrap();

        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (512, 512));
        assert_eq!(decoded.get_pixel(5, 5), &Rgba([1, 2, 3, 255]));
    }
}
