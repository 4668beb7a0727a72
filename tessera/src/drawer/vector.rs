//! Display-list backend for vector geometry.
//!
//! Nothing is rasterized: vector tiles and overlay drawings are projected to
//! screen space and kept as a list a host renderer can consume.

use tracing::debug;

use super::{
    surface_hit, Bounds, DrawContext, DrawStats, DrawerError, DrawerState, Ray, RaycastHit,
    RenderBackend,
};
use crate::coord::TILE_SIZE;
use crate::overlay::{DrawingKind, ElementKind};
use crate::tile::{GeometryKind, TileKey};

/// Where a display item came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplaySource {
    /// A feature of a vector tile layer.
    Tile { key: TileKey, layer: String },
    /// An overlay element, by kind and index.
    Element { kind: ElementKind, index: usize },
}

/// Geometry in screen pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayItem {
    pub source: DisplaySource,
    pub kind: GeometryKind,
    pub paths: Vec<Vec<(f64, f64)>>,
}

impl DisplayItem {
    fn is_element(&self) -> bool {
        matches!(self.source, DisplaySource::Element { .. })
    }
}

/// Collects screen-space geometry instead of drawing pixels.
#[derive(Debug)]
pub struct VectorBackend {
    state: DrawerState,
    size: (u32, u32),
    items: Vec<DisplayItem>,
    /// Set once a draw has filled the display list.
    drawn: bool,
}

impl Default for VectorBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorBackend {
    pub fn new() -> Self {
        Self {
            state: DrawerState::Uninitialized,
            size: (0, 0),
            items: Vec::new(),
            drawn: false,
        }
    }

    pub fn items(&self) -> &[DisplayItem] {
        &self.items
    }

    /// Bounding box of everything collected, if anything was.
    pub fn bounds(&self) -> Option<Bounds> {
        let mut points = self
            .items
            .iter()
            .flat_map(|item| item.paths.iter().flatten());
        let &(x, y) = points.next()?;
        let mut bounds = Bounds::from_point(x, y);
        for &(x, y) in points {
            bounds.include(x, y);
        }
        Some(bounds)
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

impl RenderBackend for VectorBackend {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn state(&self) -> DrawerState {
        self.state
    }

    fn initialize(&mut self, width: u32, height: u32) -> Result<(), DrawerError> {
        if self.state == DrawerState::Disposed {
            return Err(DrawerError::Disposed);
        }
        self.size = (width, height);
        self.items.clear();
        self.drawn = false;
        self.state = DrawerState::Initialized;
        debug!(width, height, "Vector backend initialized");
        Ok(())
    }

    fn draw(&mut self, ctx: &DrawContext<'_>) -> Result<DrawStats, DrawerError> {
        self.state.ensure_ready()?;
        self.size = (ctx.view.width(), ctx.view.height());
        self.items.clear();

        let tile = TILE_SIZE as f64;
        let mut stats = DrawStats::default();
        for layer in ctx.layers {
            for placement in ctx.view.placements(layer) {
                let Some(data) = ctx.cache.get(&placement.key).and_then(|t| t.data()) else {
                    stats.tiles_missing += 1;
                    continue;
                };
                let Some(vector) = data.as_vector() else {
                    stats.tiles_skipped += 1;
                    continue;
                };

                for source_layer in &vector.layers {
                    let scale = tile / source_layer.extent.max(1) as f64;
                    for feature in &source_layer.features {
                        let paths = feature
                            .paths
                            .iter()
                            .map(|path| {
                                path.iter()
                                    .map(|&[x, y]| {
                                        (
                                            placement.x + x as f64 * scale,
                                            placement.y + y as f64 * scale,
                                        )
                                    })
                                    .collect()
                            })
                            .collect();
                        self.items.push(DisplayItem {
                            source: DisplaySource::Tile {
                                key: placement.key.clone(),
                                layer: source_layer.name.clone(),
                            },
                            kind: feature.kind,
                            paths,
                        });
                    }
                }
                stats.tiles_drawn += 1;
            }
        }
        self.drawn = true;
        Ok(stats)
    }

    fn draw_elements(&mut self, ctx: &DrawContext<'_>) -> Result<usize, DrawerError> {
        self.state.ensure_ready()?;
        self.items.retain(|item| !item.is_element());

        let before = self.items.len();
        for (index, drawing) in ctx.overlays.drawings.iter().enumerate() {
            if !drawing.visible || drawing.points.is_empty() {
                continue;
            }
            let mut path = drawing.screen_points(ctx.view);
            let kind = match drawing.kind {
                DrawingKind::Line => GeometryKind::LineString,
                DrawingKind::Polygon => {
                    if let Some(first) = path.first().copied() {
                        path.push(first);
                    }
                    GeometryKind::Polygon
                }
            };
            self.items.push(DisplayItem {
                source: DisplaySource::Element {
                    kind: ElementKind::Drawing,
                    index,
                },
                kind,
                paths: vec![path],
            });
        }
        for (index, marker) in ctx.overlays.markers.iter().enumerate() {
            if !marker.visible {
                continue;
            }
            self.items.push(DisplayItem {
                source: DisplaySource::Element {
                    kind: ElementKind::Marker,
                    index,
                },
                kind: GeometryKind::Point,
                paths: vec![vec![ctx.view.geo_to_pixel(marker.position)]],
            });
        }
        self.drawn = true;
        Ok(self.items.len() - before)
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
        Ok(surface_hit(ctx, ray, max_distance, self.bounds()))
    }

    fn dispose(&mut self) {
        if self.state == DrawerState::Disposed {
            return;
        }
        self.items = Vec::new();
        self.drawn = false;
        self.state = DrawerState::Disposed;
        debug!("Vector backend disposed");
    }
}
