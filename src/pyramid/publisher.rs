//! Publishing a derived pyramid.
//!
//! Level blobs are written concurrently and joined before the descriptor is
//! written, so any reader that can see a descriptor can fetch every path it
//! lists. A failed level write abandons the attempt without touching the
//! metadata store.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use super::generator::Pyramid;
use crate::error::{DescriptorError, PyramidError};
use crate::store::{BlobStore, MetadataStore};

/// Writes pyramids to the blob and metadata stores.
#[derive(Clone)]
pub struct PyramidPublisher {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl PyramidPublisher {
    /// Create a publisher over the given stores.
    pub fn new(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, metadata }
    }

    /// The blob store levels are written to.
    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// The metadata store descriptors are written to.
    pub fn metadata_store(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Persist every level blob, then the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDescriptor` before any write if the descriptor is
    /// malformed or does not list exactly the pyramid's blobs. Returns
    /// `PersistFailure` if any write fails. When a level write fails
    /// the descriptor is never written; already-written blobs are left as
    /// orphans and overwritten by a retry.
    pub async fn persist(&self, pyramid: &Pyramid) -> Result<(), PyramidError> {
        let image_id = pyramid.image_id();

        pyramid.metadata.validate()?;
        let blob_paths = pyramid.blobs.iter().map(|blob| blob.path.as_str());
        if !pyramid.metadata.levels.iter().map(|l| l.path.as_str()).eq(blob_paths) {
            return Err(DescriptorError::BlobMismatch.into());
        }

        let writes = pyramid.blobs.iter().map(|blob| {
            let store = Arc::clone(&self.blobs);
            async move {
                store.put(&blob.path, blob.bytes.clone()).await?;
                debug!(path = %blob.path, bytes = blob.bytes.len(), "Wrote level blob");
                Ok::<_, crate::error::StoreError>(())
            }
        });

        // Join barrier: every level must be durable before the descriptor
        if let Err(e) = try_join_all(writes).await {
            warn!(image_id = %image_id, error = %e, "Level write failed, descriptor not published");
            return Err(PyramidError::PersistFailure(e));
        }

        self.metadata
            .put(image_id, &pyramid.metadata)
            .await
            .map_err(|e| {
                warn!(image_id = %image_id, error = %e, "Descriptor write failed");
                PyramidError::PersistFailure(e)
            })?;

        info!(
            image_id = %image_id,
            levels = pyramid.metadata.levels.len(),
            "Published pyramid"
        );
        Ok(())
    }
}
