//! # Pyramid Edge
//!
//! Image pyramids served from a CDN behind signed cookies.
//!
//! Uploaded originals that are too large to display directly get a
//! half-width JPEG preview next to them. Clients then fetch either level from
//! a CloudFront-compatible edge, authorized by short-lived signed cookies this
//! crate issues, without the origin being involved in each fetch.
//!
//! ## Features
//!
//! - **Deterministic derivation**: Fixed thresholds, Lanczos3 resampling and fixed JPEG quality
//! - **All-or-nothing publishing**: Level blobs are written before their descriptor
//! - **Inline or deferred**: Derive during the upload or on a background worker with retries
//! - **Signed edge cookies**: Canonical custom policies signed with RSA-SHA256
//! - **Pluggable storage**: S3, local filesystem or in-memory backends
//!
//! ## Architecture
//!
//! - [`model`] - Image, level and descriptor types
//! - [`store`] - Blob and metadata store traits and backends
//! - [`pyramid`] - Threshold policy, preview derivation, publishing, ingest
//! - [`token`] - Access policies, signing, credential encoding, verification
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pyramid_edge::{
//!     DerivationPipeline, IngestService, MemoryBlobStore, MemoryMetadataStore, PyramidPublisher,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let publisher = PyramidPublisher::new(
//!         Arc::new(MemoryBlobStore::new()),
//!         Arc::new(MemoryMetadataStore::new()),
//!     );
//!     let ingest = IngestService::inline(DerivationPipeline::new(publisher));
//!
//!     let bytes = std::fs::read("scan.png").unwrap();
//!     let outcome = ingest.ingest("block-1", bytes.into()).await.unwrap();
//!     println!("{} -> {}", outcome.image.image_id, outcome.decision);
//! }
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod pyramid;
pub mod server;
pub mod store;
pub mod token;

// Re-export commonly used types
pub use config::{
    Cli, Command, DeriveConfig, IssueConfig, IssueOutputFormat, ServeConfig, SigningArgs,
    StorageArgs, StorageBackend, VerifyConfig,
};
pub use error::{DescriptorError, PyramidError, StoreError, TokenError, VerifyError};
pub use model::{Image, ImageLevel, LevelPurpose, PyramidMetadata, SourceFormat};
pub use pyramid::{
    evaluate, evaluate_dimensions, preview_dimensions, Decision, DerivationPipeline,
    DerivationQueue, DerivationTask, DerivationWorker, IngestMode, IngestOutcome, IngestService,
    PreviewEncoder, Published, Pyramid, PyramidGenerator, PyramidPublisher,
    MAX_SINGLE_LEVEL_BYTES, MAX_SINGLE_LEVEL_DIMENSION, PREVIEW_JPEG_QUALITY,
};
pub use server::{
    create_router, AppState, CookieSettings, ErrorResponse, RouterConfig, SessionAuth,
    SessionError,
};
pub use store::{
    create_s3_client, BlobStore, CachedMetadataStore, LocalBlobStore, LocalMetadataStore,
    MemoryBlobStore, MemoryMetadataStore, MetadataStore, S3BlobStore, S3MetadataStore,
};
pub use token::{
    AccessPolicy, CookieOptions, EdgeCredential, EdgeVerifier, IpRange, IssuedCredential,
    KeySource, PolicySigner, Principal, ResourceScope, TokenIssuer, CREDENTIAL_TTL,
};
