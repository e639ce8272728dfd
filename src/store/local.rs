//! Filesystem-backed stores.
//!
//! Paths are interpreted relative to a root directory. Used by the `derive`
//! command to write a pyramid to disk for inspection, and by `serve` for
//! single-host deployments.
//!
//! Every write goes to a uniquely named sibling file which is synced and then
//! renamed over the target, so readers see either the old object or the new
//! one, never a partial file.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use super::{BlobStore, MetadataStore};
use crate::error::StoreError;
use crate::model::PyramidMetadata;

/// Blob store that writes objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a store path to a filesystem path, refusing traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::Unavailable(format!(
                "refusing non-normal path: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let staging = staging_path(&target);
        if let Err(e) = write_synced(&staging, &bytes).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StoreError::Unavailable(format!("{}: {}", staging.display(), e)));
        }

        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StoreError::Unavailable(format!("{}: {}", target.display(), e)));
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, StoreError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(StoreError::Unavailable(format!(
                "{}: {}",
                target.display(),
                e
            ))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", target.display(), e)))
    }
}

/// Unique sibling of `target` in the same directory, so the rename stays on
/// one filesystem.
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Metadata store keeping each descriptor as `{prefix}{image-id}.json` under a root.
#[derive(Debug, Clone)]
pub struct LocalMetadataStore {
    files: LocalBlobStore,
    prefix: String,
}

impl LocalMetadataStore {
    /// Create a store rooted at `root`, writing descriptors under `prefix`.
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Self {
        let prefix = match prefix.trim_matches('/') {
            "" => String::new(),
            p => format!("{}/", p),
        };
        Self {
            files: LocalBlobStore::new(root),
            prefix,
        }
    }

    /// Store path for an image's descriptor.
    pub fn path(&self, image_id: &str) -> String {
        format!("{}{}.json", self.prefix, image_id)
    }
}

#[async_trait]
impl MetadataStore for LocalMetadataStore {
    async fn put(&self, image_id: &str, metadata: &PyramidMetadata) -> Result<(), StoreError> {
        let path = self.path(image_id);
        let body = serde_json::to_vec_pretty(metadata).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        self.files.put(&path, Bytes::from(body)).await
    }

    async fn get(&self, image_id: &str) -> Result<PyramidMetadata, StoreError> {
        let path = self.path(image_id);
        let body = self.files.get(&path).await?;
        serde_json::from_slice(&body).map_err(|e| StoreError::Corrupt {
            path,
            message: e.to_string(),
        })
    }
}
