//! Pyramid level descriptors.
//!
//! A [`PyramidMetadata`] record is written once per image and is only ever
//! replaced whole. Levels are listed by descending width with the `full`
//! level first.

use serde::{Deserialize, Serialize};

use super::image::SourceFormat;
use crate::error::DescriptorError;

/// Role of a level within a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelPurpose {
    /// Authoritative copy at original resolution
    Full,

    /// Reduced-resolution derivative for fast display
    Preview,
}

/// One stored resolution of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLevel {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Blob store path
    pub path: String,

    /// Size of the stored object in bytes
    pub byte_size: u64,

    /// Role of this level
    pub purpose: LevelPurpose,
}

/// Descriptor of all stored levels for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidMetadata {
    /// Image this pyramid belongs to
    pub image_id: String,

    /// Original width in pixels
    pub width: u32,

    /// Original height in pixels
    pub height: u32,

    /// Original size in bytes
    pub byte_size: u64,

    /// Compression family of the original
    pub format: SourceFormat,

    /// Levels ordered by descending width, `full` first
    pub levels: Vec<ImageLevel>,
}

impl PyramidMetadata {
    /// The authoritative full-resolution level.
    pub fn full(&self) -> Option<&ImageLevel> {
        self.levels
            .iter()
            .find(|level| level.purpose == LevelPurpose::Full)
    }

    /// The reduced-resolution preview level, if one was derived.
    pub fn preview(&self) -> Option<&ImageLevel> {
        self.levels
            .iter()
            .find(|level| level.purpose == LevelPurpose::Preview)
    }

    /// Whether more than one level is stored.
    pub fn is_multi_level(&self) -> bool {
        self.levels.len() > 1
    }

    /// Check the structural invariants of the descriptor.
    ///
    /// Exactly one `full` level, listed first, matching the original
    /// dimensions, and widths strictly descending.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let full_count = self
            .levels
            .iter()
            .filter(|level| level.purpose == LevelPurpose::Full)
            .count();
        if full_count != 1 {
            return Err(DescriptorError::FullLevelCount(full_count));
        }

        let first = &self.levels[0];
        if first.purpose != LevelPurpose::Full {
            return Err(DescriptorError::FullLevelNotFirst);
        }
        if first.width != self.width || first.height != self.height {
            return Err(DescriptorError::FullLevelMismatch {
                level_width: first.width,
                level_height: first.height,
                width: self.width,
                height: self.height,
            });
        }

        if let Some(pair) = self.levels.windows(2).find(|p| p[1].width >= p[0].width) {
            return Err(DescriptorError::LevelOrder {
                first: pair[0].width,
                second: pair[1].width,
            });
        }

        Ok(())
    }
}
