//! Pyramid derivation.
//!
//! Turns an identified original plus a [`Decision`] into the full set of
//! level blobs and the descriptor that lists them. Nothing here touches a
//! store; publishing is [`PyramidPublisher`](super::PyramidPublisher)'s job.

use bytes::Bytes;
use image::DynamicImage;
use tracing::debug;

use super::encoder::{PreviewEncoder, PREVIEW_EXTENSION};
use super::policy::{preview_dimensions, Decision};
use crate::error::PyramidError;
use crate::model::{Image, ImageLevel, LevelPurpose, PyramidMetadata};

/// Bytes of one level, addressed by its blob store path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelBlob {
    /// Blob store path
    pub path: String,

    /// Encoded level bytes
    pub bytes: Bytes,
}

/// A derived pyramid ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pyramid {
    /// Descriptor listing every level
    pub metadata: PyramidMetadata,

    /// One blob per level, in the same order as `metadata.levels`
    pub blobs: Vec<LevelBlob>,
}

impl Pyramid {
    /// Image id the pyramid belongs to.
    pub fn image_id(&self) -> &str {
        &self.metadata.image_id
    }
}

/// Derives pyramids from original bytes.
#[derive(Debug, Clone, Default)]
pub struct PyramidGenerator {
    encoder: PreviewEncoder,
}

impl PyramidGenerator {
    /// Create a new generator.
    pub fn new() -> Self {
        Self {
            encoder: PreviewEncoder::new(),
        }
    }

    /// Derive the pyramid for `image` from its original bytes.
    ///
    /// The original is always fully decoded, so a file whose header parses
    /// but whose pixel data is corrupt never reaches the stores. Multi-level
    /// pyramids keep the original bytes unchanged as the `full` level and
    /// add a half-width JPEG preview.
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat` if the original cannot be decoded
    /// - `ResizeFailure` if no valid preview can be produced
    pub fn derive(
        &self,
        image: &Image,
        original: Bytes,
        decision: Decision,
    ) -> Result<Pyramid, PyramidError> {
        let decoded = self.decode(image, &original)?;
        match decision {
            Decision::SingleLevel => Ok(self.single_level(image, original)),
            Decision::MultiLevel => self.multi_level(image, original, &decoded),
        }
    }

    /// Fully decode `original` and check it matches the image record.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` if the pixel data cannot be decoded or its
    /// dimensions disagree with `image`.
    pub fn decode(&self, image: &Image, original: &[u8]) -> Result<DynamicImage, PyramidError> {
        let decoded = self.encoder.decode(original)?;
        if (decoded.width(), decoded.height()) != (image.width, image.height) {
            return Err(PyramidError::UnsupportedFormat {
                reason: format!(
                    "original is {}x{} but image record says {}x{}",
                    decoded.width(),
                    decoded.height(),
                    image.width,
                    image.height
                ),
            });
        }
        Ok(decoded)
    }

    /// Build the single-level pyramid: the original at its canonical path.
    ///
    /// The caller must already have decoded `original` successfully.
    pub fn single_level(&self, image: &Image, original: Bytes) -> Pyramid {
        let path = full_level_path(image, Decision::SingleLevel);
        let level = ImageLevel {
            width: image.width,
            height: image.height,
            path: path.clone(),
            byte_size: original.len() as u64,
            purpose: LevelPurpose::Full,
        };

        debug!(image_id = %image.image_id, path = %path, "Derived single-level pyramid");

        Pyramid {
            metadata: descriptor(image, vec![level]),
            blobs: vec![LevelBlob {
                path,
                bytes: original,
            }],
        }
    }

    fn multi_level(
        &self,
        image: &Image,
        original: Bytes,
        decoded: &DynamicImage,
    ) -> Result<Pyramid, PyramidError> {
        let (width, height) = (image.width, image.height);

        let (preview_width, preview_height) =
            preview_dimensions(width, height).ok_or_else(|| PyramidError::ResizeFailure {
                message: format!("{}x{} is too small to halve", width, height),
            })?;

        let preview = self.encoder.resample(decoded, preview_width, preview_height)?;

        let full_path = full_level_path(image, Decision::MultiLevel);
        let preview_path = image.level_path(preview_width, PREVIEW_EXTENSION);
    /// Run [`derive`](Self::derive) on the blocking thread pool.
    ///
    /// Decode, resample and encode are CPU-bound and must not stall the
    /// async runtime.
    pub async fn derive_blocking(
        &self,
        image: Image,
        original: Bytes,
        decision: Decision,
    ) -> Result<Pyramid, PyramidError> {
        let generator = self.clone();
        tokio::task::spawn_blocking(move || generator.derive(&image, original, decision))
            .await
            .map_err(|e| PyramidError::ResizeFailure {
                message: format!("derivation task aborted: {}", e),
            })?
    }

    /// Run [`decode`](Self::decode) on the blocking thread pool, discarding
    /// the pixels.
    pub async fn verify_blocking(&self, image: &Image, original: Bytes) -> Result<(), PyramidError> {
        let generator = self.clone();
        let image = image.clone();
        tokio::task::spawn_blocking(move || generator.decode(&image, &original).map(|_| ()))
            .await
            .map_err(|e| PyramidError::UnsupportedFormat {
                reason: format!("decode task aborted: {}", e),
            })?
    }
}

/// Path of the `full` level for `image` under `decision`.
///
/// Single-level pyramids keep the original at `{container}/{image-id}.{ext}`;
/// multi-level pyramids store it as `{container}/{image-id}/{width}w.{ext}`.
pub fn full_level_path(image: &Image, decision: Decision) -> String {
    match decision {
        Decision::SingleLevel => image.original_path(),
        Decision::MultiLevel => image.level_path(image.width, &image.extension),
    }
}

fn descriptor(image: &Image, levels: Vec<ImageLevel>) -> PyramidMetadata {
    PyramidMetadata {
        image_id: image.image_id.clone(),
        width: image.width,
        height: image.height,
        byte_size: image.byte_size,
        format: image.format,
        levels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceFormat;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Bytes {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        Bytes::from(buf.into_inner())
    }

    #[test]
    fn test_single_level() {
        let bytes = png(90, 128);
        let image = Image::identify_with_id("img", "block", &bytes).unwrap();

        let pyramid = PyramidGenerator::new()
            .derive(&image, bytes.clone(), Decision::SingleLevel)
            .unwrap();

        assert_eq!(pyramid.metadata.levels.len(), 1);
        let level = &pyramid.metadata.levels[0];
        assert_eq!(level.purpose, LevelPurpose::Full);
        assert_eq!((level.width, level.height), (90, 128));
        assert_eq!(level.path, "block/img.png");
        assert_eq!(level.byte_size, bytes.len() as u64);
        assert_eq!(pyramid.blobs[0].bytes, bytes);
        assert!(pyramid.metadata.validate().is_ok());
    }

    #[test]
    fn test_multi_level() {
        let bytes = png(301, 200);
        let image = Image::identify_with_id("img", "block", &bytes).unwrap();

        let pyramid = PyramidGenerator::new()
            .derive(&image, bytes.clone(), Decision::MultiLevel)
            .unwrap();

        let meta = &pyramid.metadata;
        assert!(meta.validate().is_ok());
        assert_eq!(meta.format, SourceFormat::Lossless);

        let full = meta.full().unwrap();
        assert_eq!(full.path, "block/img/301w.png");
        assert_eq!(pyramid.blobs[0].bytes, bytes);

        let preview = meta.preview().unwrap();
        assert_eq!((preview.width, preview.height), (150, 100));
        assert_eq!(preview.path, "block/img/150w.jpg");
        assert_eq!(preview.byte_size, pyramid.blobs[1].bytes.len() as u64);
        assert_eq!(&pyramid.blobs[1].bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_multi_level_idempotent() {
        let bytes = png(257, 129);
        let image = Image::identify_with_id("img", "block", &bytes).unwrap();
        let generator = PyramidGenerator::new();

        let first = generator
            .derive(&image, bytes.clone(), Decision::MultiLevel)
            .unwrap();
        let second = generator.derive(&image, bytes, Decision::MultiLevel).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_one_pixel_wide_is_resize_failure() {
        let bytes = png(1, 40);
        let image = Image::identify_with_id("img", "block", &bytes).unwrap();

        let result = PyramidGenerator::new().derive(&image, bytes, Decision::MultiLevel);
        assert!(matches!(result, Err(PyramidError::ResizeFailure { .. })));
    }

    #[test]
    fn test_truncated_single_level_is_unsupported() {
        let bytes = png(100, 100);
        let truncated = bytes.slice(..60);
        let image = Image::identify_with_id("img", "block", &truncated).unwrap();

        let result = PyramidGenerator::new().derive(&image, truncated, Decision::SingleLevel);
        assert!(matches!(result, Err(PyramidError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_full_level_path() {
        let bytes = png(30, 20);
        let image = Image::identify_with_id("img", "block", &bytes).unwrap();

        assert_eq!(full_level_path(&image, Decision::SingleLevel), "block/img.png");
        assert_eq!(full_level_path(&image, Decision::MultiLevel), "block/img/30w.png");
    }

    #[test]
    fn test_undecodable_is_unsupported() {
        let bytes = png(20, 20);
        let image = Image::identify_with_id("img", "block", &bytes).unwrap();

        let result = PyramidGenerator::new().derive(
            &image,
            Bytes::from_static(b"definitely not an image"),
            Decision::MultiLevel,
        );
        assert!(matches!(result, Err(PyramidError::UnsupportedFormat { .. })));
    }

    #[tokio::test]
    async fn test_derive_blocking() {
        let bytes = png(64, 64);
        let image = Image::identify_with_id("img", "block", &bytes).unwrap();

        let pyramid = PyramidGenerator::new()
            .derive_blocking(image, bytes, Decision::MultiLevel)
            .await
            .unwrap();
        assert_eq!(pyramid.metadata.preview().unwrap().width, 32);
    }
}
