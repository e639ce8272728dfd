//! Read-through LRU cache in front of a metadata store.
//!
//! Descriptors are keyed by image id and only ever replaced whole, so a
//! cached entry is either current or refreshed by the `put` that replaced it.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use super::MetadataStore;
use crate::error::StoreError;
use crate::model::PyramidMetadata;

/// Default number of cached descriptors.
pub const DEFAULT_METADATA_CACHE_CAPACITY: usize = 1024;

/// LRU cache wrapping another [`MetadataStore`].
pub struct CachedMetadataStore<M> {
    inner: M,
    cache: Mutex<LruCache<String, PyramidMetadata>>,
}

impl<M: MetadataStore> CachedMetadataStore<M> {
    /// Wrap `inner` with the default capacity.
    pub fn new(inner: M) -> Self {
        Self::with_capacity(inner, DEFAULT_METADATA_CACHE_CAPACITY)
    }

    /// Wrap `inner` caching at most `capacity` descriptors (minimum 1).
    pub fn with_capacity(inner: M, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of cached descriptors.
    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// The wrapped store.
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

#[async_trait]
impl<M: MetadataStore> MetadataStore for CachedMetadataStore<M> {
    async fn put(&self, image_id: &str, metadata: &PyramidMetadata) -> Result<(), StoreError> {
        self.inner.put(image_id, metadata).await?;
        self.cache
            .lock()
            .await
            .put(image_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<PyramidMetadata, StoreError> {
        if let Some(hit) = self.cache.lock().await.get(image_id) {
            return Ok(hit.clone());
        }

        let metadata = self.inner.get(image_id).await?;
        self.cache
            .lock()
            .await
            .put(image_id.to_string(), metadata.clone());
        Ok(metadata)
    }
}
