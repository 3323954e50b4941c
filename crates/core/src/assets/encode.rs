//! Resize + JPEG re-encode used by ingestion and thumbnail derivation.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::errors::{Result, SyncError};

/// A re-encoded JPEG plus its final dimensions.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode `bytes`, shrink so the longest edge is at most `max_edge`
/// (never upscales) and re-encode as JPEG at `quality`.
///
/// CPU-bound; callers run it on a blocking thread.
pub fn shrink_to_edge(bytes: &[u8], max_edge: u32, quality: u8) -> Result<EncodedImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| SyncError::transfer(format!("Failed to decode image: {}", e)))?;

    let (width, height) = decoded.dimensions();
    let resized = if width.max(height) > max_edge {
        decoded.resize(max_edge, max_edge, FilterType::Lanczos3)
    } else {
        decoded
    };

    // JPEG has no alpha channel.
    let flattened = DynamicImage::ImageRgb8(resized.to_rgb8());
    let (out_width, out_height) = flattened.dimensions();

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), quality);
    flattened
        .write_with_encoder(encoder)
        .map_err(|e| SyncError::transfer(format!("Failed to encode image: {}", e)))?;

    Ok(EncodedImage {
        bytes,
        width: out_width,
        height: out_height,
    })
}
