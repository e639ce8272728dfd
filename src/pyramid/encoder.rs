//! Preview encoder.
//!
//! This module handles decoding an original upload, resampling it to preview
//! size, and re-encoding it as JPEG.
//!
//! # Design Decisions
//!
//! - **Fixed parameters**: The filter (Lanczos3) and JPEG quality are
//!   constants, so re-deriving from the same original yields identical bytes.
//!
//! - **Exact target size**: The caller supplies the preview dimensions; the
//!   encoder does not re-derive them from a bounding box.
//!
//! - **Opaque output**: Alpha is flattened away since JPEG has no alpha channel.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

use crate::error::PyramidError;

/// JPEG quality used for every preview (1-100).
pub const PREVIEW_JPEG_QUALITY: u8 = 85;

/// Resampling filter used for every preview.
pub const PREVIEW_FILTER: FilterType = FilterType::Lanczos3;

/// File extension of encoded previews.
pub const PREVIEW_EXTENSION: &str = "jpg";

// =============================================================================
// Preview Encoder
// =============================================================================

/// Decodes originals and produces resampled JPEG previews.
///
/// # Example
///
/// ```ignore
/// use pyramid_edge::pyramid::PreviewEncoder;
///
/// let encoder = PreviewEncoder::new();
/// let preview = encoder.encode(&original_png, 2477, 1751)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct PreviewEncoder {}

impl PreviewEncoder {
    /// Create a new preview encoder.
    pub fn new() -> Self {
        Self {}
    }

    /// Decode `source` and return a JPEG of exactly `width` x `height`.
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat` if the source cannot be decoded
    /// - `ResizeFailure` if the target is empty or encoding fails
    pub fn encode(&self, source: &[u8], width: u32, height: u32) -> Result<Bytes, PyramidError> {
        if width == 0 || height == 0 {
            return Err(PyramidError::ResizeFailure {
                message: format!("target dimensions {}x{} are empty", width, height),
            });
        }

        let img = self.decode(source)?;
        self.resample(&img, width, height)
    }

    /// Resample an already decoded image to exactly `width` x `height` and
    /// encode it as JPEG.
    pub fn resample(
        &self,
        img: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<Bytes, PyramidError> {
        if width == 0 || height == 0 {
            return Err(PyramidError::ResizeFailure {
                message: format!("target dimensions {}x{} are empty", width, height),
            });
        }

        let resized = img.resize_exact(width, height, PREVIEW_FILTER);

        if resized.width() != width || resized.height() != height {
            return Err(PyramidError::ResizeFailure {
                message: format!(
                    "resampler produced {}x{}, expected {}x{}",
                    resized.width(),
                    resized.height(),
                    width,
                    height
                ),
            });
        }

        encode_jpeg(resized)
    }

    /// Decode the full source image.
    pub fn decode(&self, source: &[u8]) -> Result<DynamicImage, PyramidError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| PyramidError::UnsupportedFormat {
                reason: e.to_string(),
            })?;

        if reader.format().is_none() {
            return Err(PyramidError::UnsupportedFormat {
                reason: "unrecognized image signature".to_string(),
            });
        }

        reader.decode().map_err(|e| PyramidError::UnsupportedFormat {
            reason: e.to_string(),
        })
    }

    /// Get image dimensions without fully decoding.
    ///
    /// # Returns
    ///
    /// `(width, height)` in pixels.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), PyramidError> {
        ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| PyramidError::UnsupportedFormat {
                reason: e.to_string(),
            })?
            .into_dimensions()
            .map_err(|e| PyramidError::UnsupportedFormat {
                reason: e.to_string(),
            })
    }
}

/// Encode as baseline JPEG at the fixed preview quality.
fn encode_jpeg(img: DynamicImage) -> Result<Bytes, PyramidError> {
    // JPEG supports 8-bit luma and RGB only
    let img = match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img,
        DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLuma8(img.to_luma8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, PREVIEW_JPEG_QUALITY);

    encoder
        .encode_image(&img)
        .map_err(|e| PyramidError::ResizeFailure {
            message: format!("JPEG encoding failed: {}", e),
        })?;

    Ok(Bytes::from(output))
}

// =============================================================================
// Tests
// =============================================================================
