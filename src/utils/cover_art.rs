//! Cover art normalization for the offline library
//!
//! Thumbnails arrive as JPEG, PNG or WebP in sizes up to 1280px. The offline
//! player loads them from `<title>.jpg`, so everything is re-encoded as JPEG:
//! - Max 720x720 pixels
//! - Under 300KB file size

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use tracing::{debug, warn};

/// Maximum dimension for cover art (width or height)
const MAX_COVER_SIZE: u32 = 720;

/// Starting JPEG quality (0-100)
const JPEG_QUALITY: u8 = 85;

/// Maximum file size for cover art in bytes (300KB)
const MAX_COVER_BYTES: usize = 300 * 1024;

/// Decode a downloaded thumbnail and re-encode it as a baseline JPEG
///
/// - Resizes to fit within MAX_COVER_SIZE
/// - Drops the alpha channel
/// - Reduces quality if file size exceeds MAX_COVER_BYTES
pub fn normalize_cover(data: &[u8]) -> Result<Vec<u8>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("Failed to guess image format")?
        .decode()
        .context("Failed to decode cover art")?;

    let img = DynamicImage::ImageRgb8(resize_to_fit(img).to_rgb8());

    let mut quality = JPEG_QUALITY;
    loop {
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
        encoder
            .encode_image(&img)
            .context("Failed to encode cover art as JPEG")?;

        if output.len() <= MAX_COVER_BYTES || quality <= 55 {
            debug!(
                "Normalized cover art: {}x{} -> {} bytes (quality {})",
                img.width(),
                img.height(),
                output.len(),
                quality
            );
            return Ok(output);
        }

        warn!(
            "Cover art too large ({} bytes), reducing quality from {} to {}",
            output.len(),
            quality,
            quality - 10
        );
        quality -= 10;
    }
}

/// Normalize cover art, keeping the original bytes when they can't be decoded
///
/// Runs on the blocking pool since decoding and encoding are CPU-bound.
pub async fn normalize_cover_or_raw(data: bytes::Bytes) -> Vec<u8> {
    let raw = data.clone();
    match tokio::task::spawn_blocking(move || normalize_cover(&data)).await {
        Ok(Ok(jpeg)) => jpeg,
        Ok(Err(e)) => {
            debug!("Keeping cover as downloaded: {:#}", e);
            raw.to_vec()
        }
        Err(e) => {
            warn!("Cover normalization task panicked: {}", e);
            raw.to_vec()
        }
    }
}

/// Resize image to fit within MAX_COVER_SIZE while maintaining aspect ratio
fn resize_to_fit(img: DynamicImage) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    if width <= MAX_COVER_SIZE && height <= MAX_COVER_SIZE {
        return img;
    }

    let (new_width, new_height) = if width > height {
        let ratio = MAX_COVER_SIZE as f64 / width as f64;
        (MAX_COVER_SIZE, (height as f64 * ratio) as u32)
    } else {
        let ratio = MAX_COVER_SIZE as f64 / height as f64;
        ((width as f64 * ratio) as u32, MAX_COVER_SIZE)
    };

    debug!(
        "Resizing cover art: {}x{} -> {}x{}",
        width, height, new_width, new_height
    );

    img.resize(new_width, new_height, FilterType::Lanczos3)
}
