//! In-memory stores for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{BlobStore, MetadataStore};
use crate::error::StoreError;
use crate::model::PyramidMetadata;

/// Blob store backed by a shared `HashMap`.
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// All stored paths, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StoreError> {
        self.objects.write().await.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, StoreError> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.objects.read().await.contains_key(path))
    }
}

/// Metadata store backed by a shared `HashMap`.
#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    records: Arc<RwLock<HashMap<String, PyramidMetadata>>>,
}

impl MemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored descriptors.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no descriptors.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn put(&self, image_id: &str, metadata: &PyramidMetadata) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(image_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<PyramidMetadata, StoreError> {
        self.records
            .read()
            .await
            .get(image_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(image_id.to_string()))
    }
}
