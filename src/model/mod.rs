//! Shared image entity model.
//!
//! Both pipelines speak in terms of these types: the pyramid generator
//! produces [`PyramidMetadata`] for an [`Image`], and issued credentials
//! cover the paths those levels are stored under.

mod image;
mod metadata;

pub use image::{codec_extension, Image, SourceFormat};
pub use metadata::{ImageLevel, LevelPurpose, PyramidMetadata};
