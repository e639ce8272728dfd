//! Upload ingestion.
//!
//! The ingest path identifies an upload, evaluates it, and then either
//! derives and publishes the pyramid inline or stages the original at its
//! `full` level path and hands it to the derivation worker. Either way the
//! original is stored once, at the path its descriptor will reference.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use super::generator::{full_level_path, PyramidGenerator};
use super::policy::{evaluate, Decision};
use super::publisher::PyramidPublisher;
use super::worker::DerivationQueue;
use crate::error::PyramidError;
use crate::model::{Image, PyramidMetadata};
use crate::store::BlobStore;

/// Where derivation runs relative to the upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Derive and publish before the upload returns
    #[default]
    Inline,

    /// Queue derivation for the background worker
    Deferred,
}

impl std::str::FromStr for IngestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(IngestMode::Inline),
            "deferred" => Ok(IngestMode::Deferred),
            other => Err(format!(
                "unknown ingest mode '{}' (expected inline or deferred)",
                other
            )),
        }
    }
}

/// Result of running derivation and publication for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Published {
    /// The descriptor that was written
    pub metadata: PyramidMetadata,

    /// True when a preview was wanted but could not be produced and the
    /// single-level pyramid was published instead
    pub fallback: bool,
}

/// Derive-then-publish, shared by the inline path and the worker.
#[derive(Clone)]
pub struct DerivationPipeline {
    generator: PyramidGenerator,
    publisher: PyramidPublisher,
}

impl DerivationPipeline {
    /// Create a pipeline publishing through `publisher`.
    pub fn new(publisher: PyramidPublisher) -> Self {
        Self {
            generator: PyramidGenerator::new(),
            publisher,
        }
    }

    /// The publisher used by this pipeline.
    pub fn publisher(&self) -> &PyramidPublisher {
        &self.publisher
    }

    /// The generator used by this pipeline.
    pub fn generator(&self) -> &PyramidGenerator {
        &self.generator
    }

    /// Derive the pyramid for `image` and publish it.
    ///
    /// A `ResizeFailure` on a multi-level derivation degrades to the
    /// single-level pyramid, since the original is always servable as-is.
    pub async fn run(
        &self,
        image: &Image,
        original: Bytes,
        decision: Decision,
    ) -> Result<Published, PyramidError> {
        let (pyramid, fallback) = match self
            .generator
            .derive_blocking(image.clone(), original.clone(), decision)
            .await
        {
            Ok(pyramid) => (pyramid, false),
            Err(PyramidError::ResizeFailure { message }) if decision == Decision::MultiLevel => {
                warn!(
                    image_id = %image.image_id,
                    error = %message,
                    "Preview derivation failed, publishing original only"
                );
                (self.generator.single_level(image, original), true)
            }
            Err(e) => return Err(e),
        };

        self.publisher.persist(&pyramid).await?;

        Ok(Published {
            metadata: pyramid.metadata,
            fallback,
        })
    }
}

/// Outcome of one upload.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    /// The identified image record
    pub image: Image,

    /// Threshold decision
    pub decision: Decision,

    /// Published descriptor (absent when derivation was deferred)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PyramidMetadata>,

    /// Whether the single-level fallback was used
    pub fallback: bool,

    /// Whether derivation was handed to the worker
    pub deferred: bool,
}

/// Upload pipeline entry point.
#[derive(Clone)]
pub struct IngestService {
    pipeline: DerivationPipeline,
    queue: Option<DerivationQueue>,
}

impl IngestService {
    /// Create a service that derives inline.
    pub fn inline(pipeline: DerivationPipeline) -> Self {
        Self {
            pipeline,
            queue: None,
        }
    }

    /// Create a service that defers derivation to a worker.
    pub fn deferred(pipeline: DerivationPipeline, queue: DerivationQueue) -> Self {
        Self {
            pipeline,
            queue: Some(queue),
        }
    }

    /// Blob store originals and levels are written to.
    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        self.pipeline.publisher().blob_store()
    }

    /// Current mode.
    pub fn mode(&self) -> IngestMode {
        if self.queue.is_some() {
            IngestMode::Deferred
        } else {
            IngestMode::Inline
        }
    }

    /// Ingest an upload into `container_id`.
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat` if the upload is not a decodable image; nothing is stored
    /// - `PersistFailure` if the original or any level cannot be written
    pub async fn ingest(
        &self,
        container_id: &str,
        original: Bytes,
    ) -> Result<IngestOutcome, PyramidError> {
        let image = Image::identify(container_id, &original)?;
        let decision = evaluate(&image);

        info!(
            image_id = %image.image_id,
            container_id = %image.container_id,
            width = image.width,
            height = image.height,
            bytes = image.byte_size,
            format = %image.format,
            decision = %decision,
            "Ingesting image"
        );

        if let Some(queue) = &self.queue {
            // Reject undecodable uploads before anything is staged
            self.pipeline
                .generator()
                .verify_blocking(&image, original.clone())
                .await?;

            let source_path = full_level_path(&image, decision);
            self.pipeline
                .publisher()
                .blob_store()
                .put(&source_path, original)
                .await
                .map_err(PyramidError::PersistFailure)?;

            queue.submit(image.clone(), decision, source_path).await?;
            return Ok(IngestOutcome {
                image,
                decision,
                metadata: None,
                fallback: false,
                deferred: true,
            });
        }

        let published = self.pipeline.run(&image, original, decision).await?;

        Ok(IngestOutcome {
            image,
            decision,
            metadata: Some(published.metadata),
            fallback: published.fallback,
            deferred: false,
        })
    }
}
