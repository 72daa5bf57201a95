//! JPEG encoder facade.
//!
//! Takes whatever blob the capture backend produced and turns it into
//! something a browser can display, preferring JPEG. Compression is
//! best-effort: on any codec failure the input passes through
//! unchanged with its sniffed MIME type.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};

use crate::tiff;

// ── ImageMime ────────────────────────────────────────────────────

/// MIME type of a compressed frame, detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Tiff,
    OctetStream,
}

impl ImageMime {
    /// The wire representation used in HTTP headers.
    pub const fn as_str(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Tiff => "image/tiff",
            ImageMime::OctetStream => "application/octet-stream",
        }
    }
}

/// Detect a blob's MIME type from its first two bytes.
///
/// Total on non-empty input; unknown magic falls back to PNG, which is
/// what the capture tools emit when they are not emitting TIFF.
pub fn detect_mime(data: &[u8]) -> ImageMime {
    match data {
        [0xFF, 0xD8, ..] => ImageMime::Jpeg,
        [0x89, 0x50, ..] => ImageMime::Png,
        [0x49, 0x49, ..] | [0x4D, 0x4D, ..] => ImageMime::Tiff,
        [] => ImageMime::OctetStream,
        _ => ImageMime::Png,
    }
}

// ── CompressedFrame ──────────────────────────────────────────────

/// A compressed frame ready for transport, immutable once produced.
#[derive(Debug, Clone)]
pub struct CompressedFrame {
    pub data: Vec<u8>,
    pub mime: ImageMime,
}

/// Compress a captured blob to JPEG at the given quality (1–100).
///
/// - already JPEG: passed through untouched;
/// - TIFF: decoded with [`tiff::decode`] and re-encoded;
/// - PNG: decoded with the image library and re-encoded;
/// - anything else, or any codec failure: passed through with the
///   sniffed MIME type.
pub fn compress(data: Vec<u8>, quality: u8) -> CompressedFrame {
    let quality = quality.clamp(1, 100);
    let mime = detect_mime(&data);

    let transcoded = match mime {
        ImageMime::Jpeg | ImageMime::OctetStream => None,
        ImageMime::Tiff => transcode_tiff(&data, quality),
        ImageMime::Png => transcode_png(&data, quality),
    };

    match transcoded {
        Some(jpeg) => CompressedFrame {
            data: jpeg,
            mime: ImageMime::Jpeg,
        },
        None => CompressedFrame { data, mime },
    }
}

/// Decode an uncompressed TIFF and encode it as JPEG.
///
/// The JPEG colour model has no alpha channel, so 4-sample input has
/// its alpha dropped.
fn transcode_tiff(data: &[u8], quality: u8) -> Option<Vec<u8>> {
    let raw = tiff::decode(data).ok()?;
    let pixel_count = raw.width as usize * raw.height as usize;

    let rgb = match raw.samples_per_pixel {
        3 => {
            let mut pixels = raw.pixels;
            pixels.truncate(pixel_count * 3);
            pixels
        }
        4 => raw
            .pixels
            .chunks_exact(4)
            .take(pixel_count)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        _ => return None,
    };

    encode_rgb(rgb, raw.width, raw.height, quality)
}

/// Decode a PNG and encode it as JPEG.
fn transcode_png(data: &[u8], quality: u8) -> Option<Vec<u8>> {
    let rgb = image::load_from_memory(data).ok()?.to_rgb8();
    let (width, height) = rgb.dimensions();
    encode_rgb(rgb.into_raw(), width, height, quality)
}

fn encode_rgb(rgb: Vec<u8>, width: u32, height: u32, quality: u8) -> Option<Vec<u8>> {
    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb)?;
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    img.write_with_encoder(encoder).ok()?;
    Some(out.into_inner())
}

// ── Tests ────────────────────────────────────────────────────────
