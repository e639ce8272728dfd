//! Storage collaborators.
//!
//! The pyramid pipeline writes level bytes to a [`BlobStore`] and the level
//! descriptor to a [`MetadataStore`]. Both are traits so the pipeline can run
//! against S3 in production and in-memory maps in tests.
//!
//! ```text
//! ┌──────────────────────┐     put(path, bytes)     ┌──────────────────┐
//! │  PyramidPublisher    │ ───────────────────────▶ │    BlobStore     │
//! │                      │                          │ S3 / local / mem │
//! │   (join barrier)     │   put(image_id, meta)    ├──────────────────┤
//! │                      │ ───────────────────────▶ │  MetadataStore   │
//! └──────────────────────┘                          │ S3 JSON / mem    │
//!                                                   └──────────────────┘
//! ```

mod cache;
mod local;
mod memory;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::model::PyramidMetadata;

pub use cache::{CachedMetadataStore, DEFAULT_METADATA_CACHE_CAPACITY};
pub use local::{LocalBlobStore, LocalMetadataStore};
pub use memory::{MemoryBlobStore, MemoryMetadataStore};
pub use s3::{create_s3_client, S3BlobStore, S3MetadataStore};

/// Object storage for original and derived image bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Durably write `bytes` at `path`, replacing any existing object.
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StoreError>;

    /// Read the object at `path`.
    async fn get(&self, path: &str) -> Result<Bytes, StoreError>;

    /// Check whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        match self.get(path).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Key-value index of pyramid descriptors by image id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Write the descriptor for `image_id`, replacing any previous one whole.
    async fn put(&self, image_id: &str, metadata: &PyramidMetadata) -> Result<(), StoreError>;

    /// Read the descriptor for `image_id`.
    async fn get(&self, image_id: &str) -> Result<PyramidMetadata, StoreError>;
}

#[async_trait]
impl<T: MetadataStore + ?Sized> MetadataStore for Arc<T> {
    async fn put(&self, image_id: &str, metadata: &PyramidMetadata) -> Result<(), StoreError> {
        (**self).put(image_id, metadata).await
    }

    async fn get(&self, image_id: &str) -> Result<PyramidMetadata, StoreError> {
        (**self).get(image_id).await
    }
}

/// MIME type for a stored object, chosen from its path extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
