//! Lines and polygons drawn over the map.

use super::manager::MapElement;
use crate::coord::GeoPoint;
use crate::view::ViewState;

pub const DEFAULT_STROKE_COLOR: [u8; 4] = [30, 90, 200, 255];
pub const DEFAULT_STROKE_WIDTH: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawingKind {
    Line,
    /// Closed ring; the last point connects back to the first.
    Polygon,
}

/// A polyline or polygon in geographic coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Drawing {
    pub kind: DrawingKind,
    pub points: Vec<GeoPoint>,
    pub stroke: [u8; 4],
    pub fill: Option<[u8; 4]>,
    /// Stroke width in screen pixels.
    pub width: f32,
    pub visible: bool,
}

impl Drawing {
    pub fn line(points: Vec<GeoPoint>) -> Self {
        Self::new(DrawingKind::Line, points)
    }

    pub fn polygon(points: Vec<GeoPoint>) -> Self {
        Self::new(DrawingKind::Polygon, points)
    }

    fn new(kind: DrawingKind, points: Vec<GeoPoint>) -> Self {
        Self {
            kind,
            points,
            stroke: DEFAULT_STROKE_COLOR,
            fill: None,
            width: DEFAULT_STROKE_WIDTH,
            visible: true,
        }
    }

    pub fn with_stroke(mut self, color: [u8; 4]) -> Self {
        self.stroke = color;
        self
    }

    pub fn with_fill(mut self, color: [u8; 4]) -> Self {
        self.fill = Some(color);
        self
    }

    pub fn with_width(mut self, width: f32) -> Self {
        self.width = width.max(0.0);
        self
    }

    /// Vertices projected into the view's pixel space.
    pub fn screen_points(&self, view: &ViewState) -> Vec<(f64, f64)> {
        self.points.iter().map(|p| view.geo_to_pixel(*p)).collect()
    }

    fn segments(&self, points: &[(f64, f64)]) -> Vec<((f64, f64), (f64, f64))> {
        let mut segments: Vec<_> = points.windows(2).map(|w| (w[0], w[1])).collect();
        if self.kind == DrawingKind::Polygon && points.len() > 2 {
            segments.push((points[points.len() - 1], points[0]));
        }
        segments
    }
}

impl MapElement for Drawing {
    fn hit_distance(&self, view: &ViewState, px: f64, py: f64, tolerance: f64) -> Option<f64> {
        let points = self.screen_points(view);
        if points.is_empty() {
            return None;
        }
        if self.kind == DrawingKind::Polygon && points.len() > 2 && contains(&points, px, py) {
            return Some(0.0);
        }

        let distance = if points.len() == 1 {
            (px - points[0].0).hypot(py - points[0].1)
        } else {
            self.segments(&points)
                .into_iter()
                .map(|(a, b)| segment_distance((px, py), a, b))
                .fold(f64::INFINITY, f64::min)
        };
        (distance <= self.width as f64 / 2.0 + tolerance).then_some(distance)
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}

/// Even-odd point-in-polygon test.
fn contains(ring: &[(f64, f64)], px: f64, py: f64) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    (p.0 - (a.0 + t * dx)).hypot(p.1 - (a.1 + t * dy))
}
