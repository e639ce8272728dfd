//! Thresholding rule for multi-level derivation.
//!
//! An image gets a preview level when it is heavy to transmit or large to
//! render. The two ceilings are independent: exceeding either one is enough.

use serde::{Deserialize, Serialize};

use crate::model::Image;

/// Byte-size ceiling for single-level storage (1 MB).
pub const MAX_SINGLE_LEVEL_BYTES: u64 = 1_000_000;

/// Pixel-dimension ceiling for single-level storage.
pub const MAX_SINGLE_LEVEL_DIMENSION: u32 = 2048;

/// Outcome of evaluating an original against the ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Store the original only
    SingleLevel,

    /// Store the original plus a half-width preview
    MultiLevel,
}

impl Decision {
    /// Get the decision name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::SingleLevel => "single_level",
            Decision::MultiLevel => "multi_level",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decide whether an identified original needs a preview level.
pub fn evaluate(image: &Image) -> Decision {
    evaluate_dimensions(image.width, image.height, image.byte_size)
}

/// Decide from raw dimensions and byte size.
///
/// Values exactly at a ceiling stay single-level; one over triggers
/// derivation.
pub fn evaluate_dimensions(width: u32, height: u32, byte_size: u64) -> Decision {
    if byte_size > MAX_SINGLE_LEVEL_BYTES || width.max(height) > MAX_SINGLE_LEVEL_DIMENSION {
        Decision::MultiLevel
    } else {
        Decision::SingleLevel
    }
}

/// Preview dimensions for an original of `width` x `height`.
///
/// Width is halved with floor division; height keeps the original aspect
/// ratio, rounded to the nearest pixel and never below 1. Returns `None`
/// when the halved width would be zero.
pub fn preview_dimensions(width: u32, height: u32) -> Option<(u32, u32)> {
    let preview_width = width / 2;
    if preview_width == 0 || height == 0 {
        return None;
    }

    let scaled = (u64::from(height) * u64::from(preview_width) * 2 + u64::from(width))
        / (2 * u64::from(width));
    let preview_height = u32::try_from(scaled).ok()?.max(1);

    Some((preview_width, preview_height))
}
