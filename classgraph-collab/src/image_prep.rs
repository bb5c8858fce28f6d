//! Image preparation for image-to-diagram generation.
//!
//! Decode whatever the user picked, shrink it so neither side exceeds the
//! configured maximum (aspect ratio kept, never upscaled), re-encode as JPEG
//! and base64 the bytes for the JSON payload.

use std::io::Cursor;

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

/// MIME type of every prepared image.
pub const PREPARED_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("no image data")]
    Empty,
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not encode image: {0}")]
    Encode(String),
}

/// An image ready to go into a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    /// Base64 JPEG bytes, no data-URL prefix.
    pub data: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Dimensions after fitting `(width, height)` inside `max × max`.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let ratio = (max as f64 / width as f64).min(max as f64 / height as f64);
    let scaled = |side: u32| ((side as f64 * ratio).round() as u32).max(1);
    (scaled(width), scaled(height))
}

pub fn prepare_image(bytes: &[u8], max_dimension: u32, quality: u8) -> Result<PreparedImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }
    let decoded = image::load_from_memory(bytes).map_err(|e| ImageError::Decode(e.to_string()))?;
    let (width, height) = decoded.dimensions();
    let (target_w, target_h) = fit_within(width, height, max_dimension);

    let resized = if (target_w, target_h) == (width, height) {
        decoded
    } else {
        log::debug!("Downscaling image {width}x{height} -> {target_w}x{target_h}");
        decoded.resize_exact(target_w, target_h, FilterType::Triangle)
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut cursor = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut cursor, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    let jpeg = cursor.into_inner();

    Ok(PreparedImage {
        data: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        mime_type: PREPARED_MIME_TYPE,
        width: rgb.width(),
        height: rgb.height(),
    })
}
