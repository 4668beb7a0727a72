//! Point markers.

use super::manager::MapElement;
use crate::coord::{distance_meters, GeoPoint};
use crate::view::ViewState;

pub const DEFAULT_MARKER_COLOR: [u8; 4] = [220, 40, 40, 255];
pub const DEFAULT_MARKER_RADIUS: f32 = 6.0;

/// A filled circle pinned to a geographic position.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub position: GeoPoint,
    pub label: Option<String>,
    /// Straight-alpha RGBA.
    pub color: [u8; 4],
    /// Radius in screen pixels.
    pub radius: f32,
    pub visible: bool,
}

impl Marker {
    pub fn new(position: GeoPoint) -> Self {
        Self {
            position,
            label: None,
            color: DEFAULT_MARKER_COLOR,
            radius: DEFAULT_MARKER_RADIUS,
            visible: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius.max(0.0);
        self
    }

    /// Whether the marker lies within `meters` of `point` on the ground.
    pub fn is_within(&self, point: GeoPoint, meters: f64) -> bool {
        distance_meters(self.position, point) <= meters
    }
}

impl MapElement for Marker {
    fn hit_distance(&self, view: &ViewState, px: f64, py: f64, tolerance: f64) -> Option<f64> {
        let (mx, my) = view.geo_to_pixel(self.position);
        let distance = (px - mx).hypot(py - my);
        (distance <= self.radius as f64 + tolerance).then_some(distance)
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_inside_radius() {
        let view = ViewState::from_geo(GeoPoint::new(13.4, 52.5), 12, 400, 300);
        let marker = Marker::new(GeoPoint::new(13.4, 52.5)).with_radius(8.0);

        let hit = marker.hit_distance(&view, 203.0, 150.0, 0.0).unwrap();
        assert!((hit - 3.0).abs() < 1e-3);
        assert!(marker.hit_distance(&view, 215.0, 150.0, 0.0).is_none());
        assert!(marker.hit_distance(&view, 215.0, 150.0, 10.0).is_some());
    }

    #[test]
    fn test_is_within_meters() {
        let marker = Marker::new(GeoPoint::new(0.0, 0.0));
        // One hundredth of a degree of longitude at the equator is ~1.1 km
        assert!(marker.is_within(GeoPoint::new(0.01, 0.0), 1200.0));
        assert!(!marker.is_within(GeoPoint::new(0.01, 0.0), 1000.0));
    }

    #[test]
    fn test_builders() {
        let marker = Marker::new(GeoPoint::new(1.0, 2.0))
            .with_label("HQ")
            .with_color([0, 0, 255, 255])
            .with_radius(-3.0);
        assert_eq!(marker.label.as_deref(), Some("HQ"));
        assert_eq!(marker.color, [0, 0, 255, 255]);
        assert_eq!(marker.radius, 0.0);
    }
}
