use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::{content_type_for, BlobStore, MetadataStore};
use crate::error::StoreError;
use crate::model::PyramidMetadata;

/// S3-backed implementation of `BlobStore`.
///
/// Store paths are used as object keys, optionally under a fixed prefix.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3BlobStore {
    /// Create a new store for the given bucket.
    pub fn new(client: Client, bucket: String) -> Self {
        Self::with_prefix(client, bucket, None)
    }

    /// Create a new store that places every object under `prefix`.
    pub fn with_prefix(client: Client, bucket: String, prefix: Option<String>) -> Self {
        Self {
            client,
            bucket,
            prefix: normalize_prefix(prefix),
        }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for a store path.
    pub fn key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StoreError> {
        put_object(&self.client, &self.bucket, &self.key(path), bytes).await
    }

    async fn get(&self, path: &str) -> Result<Bytes, StoreError> {
        get_object(&self.client, &self.bucket, &self.key(path)).await
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let key = self.key(path);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);

                if is_not_found || status_is_404 {
                    Ok(false)
                } else {
                    Err(StoreError::Unavailable(e.to_string()))
                }
            }
        }
    }
}

/// S3-backed implementation of `MetadataStore`.
///
/// Each descriptor is a JSON object at `{prefix}{image-id}.json`.
#[derive(Clone)]
pub struct S3MetadataStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3MetadataStore {
    /// Create a new metadata store under `prefix` (defaults to `metadata/`).
    pub fn new(client: Client, bucket: String, prefix: Option<String>) -> Self {
        let prefix = normalize_prefix(prefix.or_else(|| Some("metadata".to_string())));
        Self {
            client,
            bucket,
            prefix,
        }
    }

    /// Object key for an image's descriptor.
    pub fn key(&self, image_id: &str) -> String {
        format!("{}{}.json", self.prefix, image_id)
    }
}

#[async_trait]
impl MetadataStore for S3MetadataStore {
    async fn put(&self, image_id: &str, metadata: &PyramidMetadata) -> Result<(), StoreError> {
        let key = self.key(image_id);
        let body = serde_json::to_vec(metadata).map_err(|e| StoreError::Corrupt {
            path: key.clone(),
            message: e.to_string(),
        })?;
        put_object(&self.client, &self.bucket, &key, Bytes::from(body)).await
    }

    async fn get(&self, image_id: &str) -> Result<PyramidMetadata, StoreError> {
        let key = self.key(image_id);
        let body = get_object(&self.client, &self.bucket, &key).await?;
        serde_json::from_slice(&body).map_err(|e| StoreError::Corrupt {
            path: key,
            message: e.to_string(),
        })
    }
}

async fn put_object(
    client: &Client,
    bucket: &str,
    key: &str,
    bytes: Bytes,
) -> Result<(), StoreError> {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .content_type(content_type_for(key))
        .body(ByteStream::from(bytes))
        .send()
        .await
        .map_err(|e| StoreError::Unavailable(format!("put s3://{}/{}: {}", bucket, key, e)))?;
    Ok(())
}

async fn get_object(client: &Client, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
    let resp = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| {
            let is_no_such_key = e
                .as_service_error()
                .map(|se| se.is_no_such_key())
                .unwrap_or(false);

            let status_is_404 = e
                .raw_response()
                .map(|r| r.status().as_u16() == 404)
                .unwrap_or(false);

            if is_no_such_key || status_is_404 {
                StoreError::NotFound(format!("s3://{}/{}", bucket, key))
            } else {
                StoreError::Unavailable(e.to_string())
            }
        })?;

    let data = resp
        .body
        .collect()
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .into_bytes();

    Ok(data)
}

fn normalize_prefix(prefix: Option<String>) -> String {
    match prefix {
        Some(p) if !p.trim_matches('/').is_empty() => format!("{}/", p.trim_matches('/')),
        _ => String::new(),
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services generally need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
