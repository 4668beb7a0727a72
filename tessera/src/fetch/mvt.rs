//! Mapbox Vector Tile reader.
//!
//! Reads the protobuf wire format directly: a tile is a list of layers, each
//! layer carries its own key and value tables, and features reference them
//! through packed tag indices. Geometry is a packed command stream of
//! zig-zag encoded deltas.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::tile::{
    GeometryKind, PropertyValue, VectorFeature, VectorLayer, VectorTile, DEFAULT_EXTENT,
};

/// Malformed vector tile data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MvtError {
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    #[error("varint too long at offset {0}")]
    VarintOverflow(usize),

    #[error("unsupported wire type {wire_type} at offset {offset}")]
    WireType { wire_type: u8, offset: usize },

    #[error("invalid UTF-8 in {0}")]
    Utf8(&'static str),

    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("feature tag references missing {kind} index {index}")]
    TagIndex { kind: &'static str, index: u32 },
}

type Result<T> = std::result::Result<T, MvtError>;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn varint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(MvtError::UnexpectedEof(self.pos))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MvtError::VarintOverflow(start))
    }

    /// Next field number and wire type, or `None` at the end.
    fn field(&mut self) -> Result<Option<(u32, u8)>> {
        if self.is_done() {
            return Ok(None);
        }
        let key = self.varint()?;
        Ok(Some(((key >> 3) as u32, (key & 0x7) as u8)))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(MvtError::UnexpectedEof(self.buf.len()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.varint()? as usize;
        self.take(len)
    }

    fn string(&mut self, what: &'static str) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| MvtError::Utf8(what))
    }

    fn fixed32(&mut self) -> Result<[u8; 4]> {
        let raw = self.take(4)?;
        Ok([raw[0], raw[1], raw[2], raw[3]])
    }

    fn fixed64(&mut self) -> Result<[u8; 8]> {
        let raw = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(raw);
        Ok(out)
    }

    fn skip(&mut self, wire_type: u8) -> Result<()> {
        let offset = self.pos;
        match wire_type {
            WIRE_VARINT => self.varint().map(|_| ()),
            WIRE_FIXED64 => self.take(8).map(|_| ()),
            WIRE_LEN => self.bytes().map(|_| ()),
            WIRE_FIXED32 => self.take(4).map(|_| ()),
            other => Err(MvtError::WireType {
                wire_type: other,
                offset,
            }),
        }
    }

    /// Values of a repeated integer field, packed or not.
    fn packed_varints(&mut self, wire_type: u8, out: &mut Vec<u64>) -> Result<()> {
        match wire_type {
            WIRE_LEN => {
                let mut inner = Reader::new(self.bytes()?);
                while !inner.is_done() {
                    out.push(inner.varint()?);
                }
                Ok(())
            }
            WIRE_VARINT => {
                out.push(self.varint()?);
                Ok(())
            }
            other => Err(MvtError::WireType {
                wire_type: other,
                offset: self.pos,
            }),
        }
    }
}

#[inline]
fn zigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Parse an uncompressed vector tile.
pub fn parse_tile(buf: &[u8]) -> Result<VectorTile> {
    let mut reader = Reader::new(buf);
    let mut layers = Vec::new();
    while let Some((field, wire_type)) = reader.field()? {
        match (field, wire_type) {
            (3, WIRE_LEN) => layers.push(parse_layer(reader.bytes()?)?),
            (_, wt) => reader.skip(wt)?,
        }
    }
    Ok(VectorTile { layers })
}

fn parse_layer(buf: &[u8]) -> Result<VectorLayer> {
    let mut reader = Reader::new(buf);
    let mut name = String::new();
    let mut version = 1;
    let mut extent = DEFAULT_EXTENT;
    let mut keys = Vec::new();
    let mut values = Vec::new();
    let mut raw_features = Vec::new();

    while let Some((field, wire_type)) = reader.field()? {
        match (field, wire_type) {
            (15, WIRE_VARINT) => version = reader.varint()? as u32,
            (1, WIRE_LEN) => name = reader.string("layer name")?,
            (2, WIRE_LEN) => raw_features.push(reader.bytes()?),
            (3, WIRE_LEN) => keys.push(reader.string("layer key")?),
            (4, WIRE_LEN) => values.push(parse_value(reader.bytes()?)?),
            (5, WIRE_VARINT) => extent = reader.varint()? as u32,
            (_, wt) => reader.skip(wt)?,
        }
    }

    let features = raw_features
        .into_iter()
        .map(|raw| parse_feature(raw, &keys, &values))
        .collect::<Result<Vec<_>>>()?;

    Ok(VectorLayer {
        name,
        version,
        extent,
        features,
    })
}

fn parse_value(buf: &[u8]) -> Result<Option<PropertyValue>> {
    let mut reader = Reader::new(buf);
    let mut value = None;
    while let Some((field, wire_type)) = reader.field()? {
        value = Some(match (field, wire_type) {
            (1, WIRE_LEN) => PropertyValue::String(reader.string("string value")?),
            (2, WIRE_FIXED32) => PropertyValue::Float(f32::from_le_bytes(reader.fixed32()?)),
            (3, WIRE_FIXED64) => PropertyValue::Double(f64::from_le_bytes(reader.fixed64()?)),
            (4, WIRE_VARINT) => PropertyValue::Int(reader.varint()? as i64),
            (5, WIRE_VARINT) => PropertyValue::UInt(reader.varint()?),
            (6, WIRE_VARINT) => PropertyValue::Int(zigzag(reader.varint()?)),
            (7, WIRE_VARINT) => PropertyValue::Bool(reader.varint()? != 0),
            (_, wt) => {
                reader.skip(wt)?;
                continue;
            }
        });
    }
    Ok(value)
}

fn parse_feature(
    buf: &[u8],
    keys: &[String],
    values: &[Option<PropertyValue>],
) -> Result<VectorFeature> {
    let mut reader = Reader::new(buf);
    let mut id = None;
    let mut kind = GeometryKind::Unknown;
    let mut tags = Vec::new();
    let mut geometry = Vec::new();

    while let Some((field, wire_type)) = reader.field()? {
        match (field, wire_type) {
            (1, WIRE_VARINT) => id = Some(reader.varint()?),
            (2, wt) => reader.packed_varints(wt, &mut tags)?,
            (3, WIRE_VARINT) => kind = GeometryKind::from_wire(reader.varint()?),
            (4, wt) => reader.packed_varints(wt, &mut geometry)?,
            (_, wt) => reader.skip(wt)?,
        }
    }

    if tags.len() % 2 != 0 {
        return Err(MvtError::Geometry("odd number of tag indices".to_string()));
    }
    let mut properties = BTreeMap::new();
    for pair in tags.chunks_exact(2) {
        let key = keys.get(pair[0] as usize).ok_or(MvtError::TagIndex {
            kind: "key",
            index: pair[0] as u32,
        })?;
        let value = values.get(pair[1] as usize).ok_or(MvtError::TagIndex {
            kind: "value",
            index: pair[1] as u32,
        })?;
        if let Some(value) = value {
            properties.insert(key.clone(), value.clone());
        }
    }

    Ok(VectorFeature {
        id,
        kind,
        paths: decode_geometry(&geometry)?,
        properties,
    })
}

/// Move one cursor coordinate by a zigzag-encoded delta.
fn advance(cursor: i32, param: u64) -> Result<i32> {
    i32::try_from(zigzag(param))
        .ok()
        .and_then(|delta| cursor.checked_add(delta))
        .ok_or_else(|| {
            MvtError::Geometry(format!("cursor {} moved out of range by {}", cursor, zigzag(param)))
        })
}

/// Decode a geometry command stream into absolute paths.
pub fn decode_geometry(commands: &[u64]) -> Result<Vec<Vec<[i32; 2]>>> {
    let mut paths: Vec<Vec<[i32; 2]>> = Vec::new();
    let (mut x, mut y) = (0i32, 0i32);
    let mut i = 0;

    while i < commands.len() {
        let command = commands[i] as u32;
        i += 1;
        let id = command & 0x7;
        let count = (command >> 3) as usize;

        match id {
            CMD_MOVE_TO | CMD_LINE_TO => {
                if commands.len() - i < count * 2 {
                    return Err(MvtError::Geometry(format!(
                        "command {} needs {} parameters",
                        id,
                        count * 2
                    )));
                }
                if id == CMD_LINE_TO && paths.is_empty() {
                    return Err(MvtError::Geometry("LineTo before MoveTo".to_string()));
                }
                for _ in 0..count {
                    x = advance(x, commands[i])?;
                    y = advance(y, commands[i + 1])?;
                    i += 2;
                    let point = [x, y];
                    if id == CMD_MOVE_TO {
                        paths.push(vec![point]);
                    } else if let Some(path) = paths.last_mut() {
                        path.push(point);
                    }
                }
            }
            CMD_CLOSE_PATH => {
                let path = paths
                    .last_mut()
                    .ok_or_else(|| MvtError::Geometry("ClosePath before MoveTo".to_string()))?;
                if let Some(first) = path.first().copied() {
                    path.push(first);
                }
            }
            other => {
                return Err(MvtError::Geometry(format!("unknown command {}", other)));
            }
        }
    }
    Ok(paths)
}
