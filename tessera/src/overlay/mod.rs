//! Interactive overlay elements drawn above the tiles.
//!
//! [`Overlays`] groups one [`ElementManager`] per element kind. Render
//! backends draw them in `draw_elements` and consult [`Overlays::hit_test`]
//! when answering raycasts.

mod drawing;
mod manager;
mod marker;

pub use drawing::{Drawing, DrawingKind, DEFAULT_STROKE_COLOR, DEFAULT_STROKE_WIDTH};
pub use manager::{ElementManager, MapElement};
pub use marker::{Marker, DEFAULT_MARKER_COLOR, DEFAULT_MARKER_RADIUS};

use crate::coord::GeoPoint;
use crate::view::ViewState;

/// Extra screen distance, in pixels, that still counts as a hit.
pub const DEFAULT_HIT_TOLERANCE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Marker,
    Drawing,
}

/// Element found under a screen point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementHit {
    pub kind: ElementKind,
    /// Index within the kind's manager.
    pub index: usize,
    /// Screen distance in pixels.
    pub distance: f64,
}

/// All overlay elements of a map.
#[derive(Debug, Clone)]
pub struct Overlays {
    pub markers: ElementManager<Marker>,
    pub drawings: ElementManager<Drawing>,
    tolerance: f64,
}

impl Default for Overlays {
    fn default() -> Self {
        Self {
            markers: ElementManager::new(),
            drawings: ElementManager::new(),
            tolerance: DEFAULT_HIT_TOLERANCE,
        }
    }
}

impl Overlays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Element under a screen point. Markers draw above drawings and win.
    pub fn hit_test(&self, view: &ViewState, px: f64, py: f64) -> Option<ElementHit> {
        if let Some((index, distance)) = self.markers.hit_test(view, px, py, self.tolerance) {
            return Some(ElementHit {
                kind: ElementKind::Marker,
                index,
                distance,
            });
        }
        self.drawings
            .hit_test(view, px, py, self.tolerance)
            .map(|(index, distance)| ElementHit {
                kind: ElementKind::Drawing,
                index,
                distance,
            })
    }

    /// Indices of markers within `meters` of `point`.
    pub fn markers_within(&self, point: GeoPoint, meters: f64) -> Vec<usize> {
        self.markers
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_within(point, meters))
            .map(|(i, _)| i)
            .collect()
    }

    /// Changes whenever any element is added, removed or edited.
    pub fn revision(&self) -> u64 {
        self.markers.revision() + self.drawings.revision()
    }

    pub fn len(&self) -> usize {
        self.markers.len() + self.drawings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
