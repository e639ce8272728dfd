//! The logical image entity and its storage path conventions.

use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};

use crate::error::PyramidError;

// =============================================================================
// Source Format
// =============================================================================

/// Compression family of an uploaded original.
///
/// The concrete codec only matters for choosing a file extension; the
/// pyramid pipeline cares whether the authoritative bytes are lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// PNG, TIFF, BMP and other formats that round-trip pixels exactly
    Lossless,

    /// JPEG, WebP, AVIF
    Lossy,

    /// Decodable but not classified
    Other,
}

impl SourceFormat {
    /// Classify a detected codec.
    pub fn from_codec(codec: ImageFormat) -> Self {
        match codec {
            ImageFormat::Png
            | ImageFormat::Tiff
            | ImageFormat::Bmp
            | ImageFormat::Tga
            | ImageFormat::Qoi
            | ImageFormat::Pnm
            | ImageFormat::Farbfeld
            | ImageFormat::Gif => SourceFormat::Lossless,
            ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Avif => SourceFormat::Lossy,
            _ => SourceFormat::Other,
        }
    }

    /// Get the format name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Lossless => "lossless",
            SourceFormat::Lossy => "lossy",
            SourceFormat::Other => "other",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical file extension for a detected codec.
pub fn codec_extension(codec: ImageFormat) -> &'static str {
    codec.extensions_str().first().copied().unwrap_or("bin")
}

// =============================================================================
// Image
// =============================================================================

/// One logical picture owned by a container (a task or block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Unique identifier
    pub image_id: String,

    /// Owning container identifier
    pub container_id: String,

    /// Size of the original upload in bytes
    pub byte_size: u64,

    /// Original width in pixels
    pub width: u32,

    /// Original height in pixels
    pub height: u32,

    /// Compression family of the original
    pub format: SourceFormat,

    /// File extension of the original codec (e.g. "png")
    pub extension: String,

    /// Creation time (Unix epoch seconds)
    pub created_at: u64,
}

impl Image {
    /// Identify an uploaded original and assign it a fresh identifier.
    ///
    /// Only the header is parsed; pixel data is not decoded here.
    pub fn identify(container_id: impl Into<String>, bytes: &[u8]) -> Result<Self, PyramidError> {
        Self::identify_with_id(uuid::Uuid::new_v4().to_string(), container_id, bytes)
    }

    /// Identify an uploaded original under a caller-chosen identifier.
    pub fn identify_with_id(
        image_id: impl Into<String>,
        container_id: impl Into<String>,
        bytes: &[u8],
    ) -> Result<Self, PyramidError> {
        let codec = image::guess_format(bytes).map_err(|e| PyramidError::UnsupportedFormat {
            reason: e.to_string(),
        })?;

        let (width, height) = ImageReader::with_format(Cursor::new(bytes), codec)
            .into_dimensions()
            .map_err(|e| PyramidError::UnsupportedFormat {
                reason: e.to_string(),
            })?;

        if width == 0 || height == 0 {
            return Err(PyramidError::UnsupportedFormat {
                reason: format!("image has empty dimensions {}x{}", width, height),
            });
        }

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Self {
            image_id: image_id.into(),
            container_id: container_id.into().trim_matches('/').to_string(),
            byte_size: bytes.len() as u64,
            width,
            height,
            format: SourceFormat::from_codec(codec),
            extension: codec_extension(codec).to_string(),
            created_at,
        })
    }

    /// Canonical object path of the original upload.
    ///
    /// `{container}/{image-id}.{ext}`
    pub fn original_path(&self) -> String {
        format!("{}/{}.{}", self.container_id, self.image_id, self.extension)
    }

    /// Object path of one level of a multi-level pyramid.
    ///
    /// `{container}/{image-id}/{width}w.{ext}`
    pub fn level_path(&self, width: u32, extension: &str) -> String {
        format!(
            "{}/{}/{}w.{}",
            self.container_id, self.image_id, width, extension
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
