//! Pyramid generation.
//!
//! This module decides whether an uploaded original needs a reduced-resolution
//! preview, derives it deterministically, and publishes the levels together
//! with their descriptor.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              IngestService              │
//! │  identify → store original → evaluate   │
//! └──────────┬───────────────────┬──────────┘
//!            │ inline            │ deferred
//!            │                   ▼
//!            │        ┌─────────────────────┐
//!            │        │  DerivationWorker   │
//!            │        │  (mpsc, retries)    │
//!            │        └──────────┬──────────┘
//!            ▼                   ▼
//! ┌─────────────────────────────────────────┐
//! │           DerivationPipeline            │
//! │  ┌──────────────────┐ ┌──────────────┐  │
//! │  │ PyramidGenerator │ │  Publisher   │  │
//! │  │ (Lanczos3, JPEG) │ │ (join, then  │  │
//! │  │                  │ │  metadata)   │  │
//! │  └──────────────────┘ └──────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`evaluate`]: Pure threshold rule (1 MB or 2048 px, either one)
//! - [`PreviewEncoder`]: Decode, resample, JPEG encode with fixed parameters
//! - [`PyramidGenerator`]: Builds level blobs and the descriptor
//! - [`PyramidPublisher`]: All-or-nothing publication
//! - [`IngestService`]: Upload entry point
//! - [`DerivationWorker`]: Background derivation with at-least-once retries

mod encoder;
mod generator;
mod ingest;
mod policy;
mod publisher;
mod worker;

pub use encoder::{PreviewEncoder, PREVIEW_EXTENSION, PREVIEW_FILTER, PREVIEW_JPEG_QUALITY};
pub use generator::{full_level_path, LevelBlob, Pyramid, PyramidGenerator};
pub use ingest::{DerivationPipeline, IngestMode, IngestOutcome, IngestService, Published};
pub use policy::{
    evaluate, evaluate_dimensions, preview_dimensions, Decision, MAX_SINGLE_LEVEL_BYTES,
    MAX_SINGLE_LEVEL_DIMENSION,
};
pub use publisher::PyramidPublisher;
pub use worker::{
    DerivationQueue, DerivationTask, DerivationWorker, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_QUEUE_CAPACITY,
};
