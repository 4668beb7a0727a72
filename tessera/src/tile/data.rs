//! Decoded tile payloads.

use std::collections::BTreeMap;

use image::RgbaImage;

/// Drawable result of decoding a tile's bytes.
#[derive(Debug, Clone)]
pub enum TileData {
    /// RGBA pixels, row-major, straight alpha.
    Raster(RgbaImage),
    /// Parsed vector geometry in tile-local coordinates.
    Vector(VectorTile),
}

impl TileData {
    /// Approximate memory held by the payload, in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            TileData::Raster(image) => image.as_raw().len(),
            TileData::Vector(tile) => tile.byte_size(),
        }
    }

    pub fn as_raster(&self) -> Option<&RgbaImage> {
        match self {
            TileData::Raster(image) => Some(image),
            TileData::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorTile> {
        match self {
            TileData::Vector(tile) => Some(tile),
            TileData::Raster(_) => None,
        }
    }
}

/// A decoded vector tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorTile {
    pub layers: Vec<VectorLayer>,
}

impl VectorTile {
    pub fn layer(&self, name: &str) -> Option<&VectorLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }

    fn byte_size(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| {
                layer.name.len()
                    + layer
                        .features
                        .iter()
                        .map(VectorFeature::byte_size)
                        .sum::<usize>()
            })
            .sum()
    }
}

/// Default extent of a vector tile layer.
pub const DEFAULT_EXTENT: u32 = 4096;

/// One named layer inside a vector tile.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorLayer {
    pub name: String,
    pub version: u32,
    /// Size of the tile's coordinate space; geometry spans `0..extent`.
    pub extent: u32,
    pub features: Vec<VectorFeature>,
}

/// Geometry kind of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Unknown,
    Point,
    LineString,
    Polygon,
}

impl GeometryKind {
    pub(crate) fn from_wire(value: u64) -> Self {
        match value {
            1 => GeometryKind::Point,
            2 => GeometryKind::LineString,
            3 => GeometryKind::Polygon,
            _ => GeometryKind::Unknown,
        }
    }
}

/// Attribute value attached to a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

/// A feature: geometry paths plus properties.
///
/// Each path is a run of points started by a move-to. Polygon rings are
/// closed by repeating the first point.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFeature {
    pub id: Option<u64>,
    pub kind: GeometryKind,
    pub paths: Vec<Vec<[i32; 2]>>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl VectorFeature {
    fn byte_size(&self) -> usize {
        let geometry: usize = self.paths.iter().map(|p| p.len() * 8).sum();
        let props: usize = self
            .properties
            .iter()
            .map(|(k, v)| {
                k.len()
                    + match v {
                        PropertyValue::String(s) => s.len(),
                        _ => 8,
                    }
            })
            .sum();
        geometry + props + 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_byte_size() {
        let data = TileData::Raster(RgbaImage::new(256, 256));
        assert_eq!(data.byte_size(), 256 * 256 * 4);
        assert!(data.as_raster().is_some());
        assert!(data.as_vector().is_none());
    }

    #[test]
    fn test_vector_lookup_and_size() {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), PropertyValue::String("A1".to_string()));
        let tile = VectorTile {
            layers: vec![VectorLayer {
                name: "roads".to_string(),
                version: 2,
                extent: DEFAULT_EXTENT,
                features: vec![VectorFeature {
                    id: Some(1),
                    kind: GeometryKind::LineString,
                    paths: vec![vec![[0, 0], [10, 10]]],
                    properties,
                }],
            }],
        };

        assert_eq!(tile.feature_count(), 1);
        assert!(tile.layer("roads").is_some());
        assert!(tile.layer("water").is_none());

        let data = TileData::Vector(tile);
        assert!(data.byte_size() > 0);
    }

    #[test]
    fn test_geometry_kind_from_wire() {
        assert_eq!(GeometryKind::from_wire(1), GeometryKind::Point);
        assert_eq!(GeometryKind::from_wire(3), GeometryKind::Polygon);
        assert_eq!(GeometryKind::from_wire(9), GeometryKind::Unknown);
    }
}
