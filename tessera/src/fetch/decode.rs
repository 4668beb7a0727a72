//! Payload decoding by layer content type.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use super::mvt;
use crate::provider::ContentType;
use crate::tile::{TileData, TileError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// First byte of an uncompressed vector tile: field 3, length-delimited.
const MVT_LAYER_TAG: u8 = 0x1a;

/// Decode fetched bytes into drawable tile data.
///
/// Raster payloads go through the `image` crate and come out as RGBA.
/// Vector payloads are decompressed if needed and parsed as MVT.
pub fn decode_tile(content: ContentType, bytes: &[u8]) -> Result<TileData, TileError> {
    match content {
        ContentType::Raster => decode_raster(bytes).map(TileData::Raster),
        ContentType::Vector => decode_vector(bytes).map(TileData::Vector),
    }
}

pub fn decode_raster(bytes: &[u8]) -> Result<image::RgbaImage, TileError> {
    if bytes.is_empty() {
        return Err(TileError::Decode("empty image payload".to_string()));
    }
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| TileError::Decode(format!("image: {}", e)))
}

pub fn decode_vector(bytes: &[u8]) -> Result<crate::tile::VectorTile, TileError> {
    let plain = decompress(bytes)?;
    mvt::parse_tile(&plain).map_err(|e| TileError::Decode(format!("mvt: {}", e)))
}

/// Undo transport compression on a vector payload.
///
/// Recognizes gzip by its magic, zlib by its header checksum, and otherwise
/// tries raw deflate unless the data already looks like a bare tile.
pub fn decompress(bytes: &[u8]) -> Result<Cow<'_, [u8]>, TileError> {
    if bytes.is_empty() {
        return Ok(Cow::Borrowed(bytes));
    }
    if bytes.starts_with(&GZIP_MAGIC) {
        return inflate(GzDecoder::new(bytes), "gzip").map(Cow::Owned);
    }
    if is_zlib_header(bytes) {
        return inflate(ZlibDecoder::new(bytes), "zlib").map(Cow::Owned);
    }
    if bytes[0] != MVT_LAYER_TAG {
        return inflate(DeflateDecoder::new(bytes), "deflate").map(Cow::Owned);
    }
    Ok(Cow::Borrowed(bytes))
}

fn is_zlib_header(bytes: &[u8]) -> bool {
    match bytes {
        [cmf, flg, ..] => cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn inflate(mut reader: impl Read, codec: &str) -> Result<Vec<u8>, TileError> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| TileError::Decode(format!("{}: {}", codec, e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::mvt::fixtures::sample_tile;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::{Cursor, Write};

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let data = decode_tile(ContentType::Raster, &png_bytes()).unwrap();
        let img = data.as_raster().unwrap();
        assert_eq!(img.dimensions(), (4, 4));
        assert_eq!(img.get_pixel(2, 2), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_corrupt_image_is_decode_error() {
        let err = decode_tile(ContentType::Raster, b"definitely not a png").unwrap_err();
        assert!(matches!(err, TileError::Decode(_)));
        assert!(matches!(
            decode_tile(ContentType::Raster, &[]),
            Err(TileError::Decode(_))
        ));
    }

    #[test]
    fn test_plain_vector_tile() {
        let data = decode_tile(ContentType::Vector, &sample_tile()).unwrap();
        assert_eq!(data.as_vector().unwrap().feature_count(), 2);
    }

    #[test]
    fn test_gzip_vector_tile() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&sample_tile()).unwrap();
        let compressed = encoder.finish().unwrap();

        let data = decode_tile(ContentType::Vector, &compressed).unwrap();
        let tile = data.as_vector().unwrap();
        assert!(tile.layer("roads").is_some());
        assert!(tile.layer("water").is_some());
    }

    #[test]
    fn test_zlib_and_deflate_vector_tiles() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&sample_tile()).unwrap();
        let zlib = zlib.finish().unwrap();
        assert_eq!(decompress(&zlib).unwrap().as_ref(), sample_tile().as_slice());

        let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
        deflate.write_all(&sample_tile()).unwrap();
        let deflate = deflate.finish().unwrap();
        assert_eq!(
            decompress(&deflate).unwrap().as_ref(),
            sample_tile().as_slice()
        );
    }

    #[test]
    fn test_corrupt_gzip_is_decode_error() {
        let err = decode_tile(ContentType::Vector, &[0x1f, 0x8b, 0x08, 0x00, 0xff]).unwrap_err();
        match err {
            TileError::Decode(msg) => assert!(msg.starts_with("gzip")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_vector_payload_is_empty_tile() {
        let data = decode_tile(ContentType::Vector, &[]).unwrap();
        assert_eq!(data.as_vector().unwrap().feature_count(), 0);
    }
}
