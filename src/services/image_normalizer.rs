// src/services/image_normalizer.rs
use crate::errors::StudioError;
use crate::models::{MAX_DIMENSION_PX, MAX_FILE_SIZE_MB, NormalizedImage, UploadedImage};
use base64::{Engine as _, engine::general_purpose};
use image::GenericImageView;
use image::codecs::jpeg::JpegEncoder;

const ALLOWED_TYPES: [&str; 2] = ["image/png", "image/jpeg"];
const JPEG_QUALITY: u8 = 90;

pub struct ImageNormalizer;

impl ImageNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Validate, decode, bound-resize and re-encode an upload.
    ///
    /// Rejects non-PNG/JPEG declared types and files over the size limit
    /// before touching pixel data. Images whose larger dimension exceeds
    /// MAX_DIMENSION_PX are scaled down in a single pass so that dimension
    /// lands exactly on the maximum, the other rounded to the nearest pixel.
    pub fn normalize(&self, upload: &UploadedImage) -> Result<NormalizedImage, StudioError> {
        if !ALLOWED_TYPES.contains(&upload.content_type.as_str()) {
            return Err(StudioError::InvalidType(upload.content_type.clone()));
        }

        if upload.data.len() > MAX_FILE_SIZE_MB * 1024 * 1024 {
            return Err(StudioError::TooLarge(upload.data.len(), MAX_FILE_SIZE_MB));
        }

        let img = image::load_from_memory(&upload.data)
            .map_err(|e| StudioError::ImageProcessing(format!("Failed to decode image: {}", e)))?;

        let (width, height) = img.dimensions();
        let (target_width, target_height) = target_dimensions(width, height);

        let img = if (target_width, target_height) != (width, height) {
            img.resize_exact(
                target_width,
                target_height,
                image::imageops::FilterType::Lanczos3,
            )
        } else {
            img
        };

        // JPEG has no alpha channel, so flatten before encoding.
        let rgb = img.to_rgb8();
        let mut encoded = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
        encoder.encode_image(&rgb).map_err(|e| {
            StudioError::ImageProcessing(format!("Failed to encode image: {}", e))
        })?;

        Ok(NormalizedImage {
            width: target_width,
            height: target_height,
            data_url: format!(
                "data:image/jpeg;base64,{}",
                general_purpose::STANDARD.encode(&encoded)
            ),
        })
    }
}

/// Aspect-preserving bound: the larger dimension is pinned to
/// MAX_DIMENSION_PX, the other rounded to the nearest integer.
fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width <= MAX_DIMENSION_PX && height <= MAX_DIMENSION_PX {
        return (width, height);
    }

    if width > height {
        let scaled = (height as f64 * MAX_DIMENSION_PX as f64 / width as f64).round() as u32;
        (MAX_DIMENSION_PX, scaled)
    } else {
        let scaled = (width as f64 * MAX_DIMENSION_PX as f64 / height as f64).round() as u32;
        (scaled, MAX_DIMENSION_PX)
    }
}
