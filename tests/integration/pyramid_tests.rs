//! Pyramid derivation and publishing tests.
//!
//! Tests verify:
//! - Threshold decisions for real encoded uploads
//! - Preview geometry and encoding
//! - Level bytes are written before the descriptor
//! - Failed writes never publish a descriptor
//! - Deferred derivation through the background worker

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use pyramid_edge::{
    evaluate_dimensions, preview_dimensions, BlobStore, Decision, DerivationWorker, IngestMode,
    IngestService, LevelPurpose, MemoryMetadataStore, MetadataStore, PyramidError, StoreError,
};

use super::test_utils::{
    dimensions_of, gradient_png, is_valid_jpeg, noise_png, pipeline, FlakyMetadataStore,
    MemoryFixture, RecordingBlobStore,
};

// =============================================================================
// Threshold Decisions
// =============================================================================

#[test]
fn test_large_scan_geometry() {
    assert_eq!(evaluate_dimensions(4955, 3503, 5_200_000), Decision::MultiLevel);
    assert_eq!(preview_dimensions(4955, 3503), Some((2477, 1751)));
}

#[test]
fn test_small_photo_geometry() {
    assert_eq!(evaluate_dimensions(904, 1280, 291_000), Decision::SingleLevel);
}

#[test]
fn test_ceilings_are_exclusive() {
    assert_eq!(evaluate_dimensions(2048, 2048, 1_000_000), Decision::SingleLevel);
    assert_eq!(evaluate_dimensions(2049, 10, 10), Decision::MultiLevel);
    assert_eq!(evaluate_dimensions(10, 2049, 10), Decision::MultiLevel);
    assert_eq!(evaluate_dimensions(10, 10, 1_000_001), Decision::MultiLevel);
}

// =============================================================================
// Inline Ingest
// =============================================================================

#[tokio::test]
async fn test_large_scan_gets_preview() {
    let fixture = MemoryFixture::new();
    let original = Bytes::from(gradient_png(4955, 3503));

    let outcome = fixture
        .ingest
        .ingest("block-7", original.clone())
        .await
        .unwrap();

    assert_eq!(outcome.decision, Decision::MultiLevel);
    assert!(!outcome.deferred);
    assert!(!outcome.fallback);

    let metadata = outcome.metadata.unwrap();
    metadata.validate().unwrap();
    assert_eq!(metadata.levels.len(), 2);

    let image_id = &outcome.image.image_id;
    let full = &metadata.levels[0];
    assert_eq!(full.purpose, LevelPurpose::Full);
    assert_eq!((full.width, full.height), (4955, 3503));
    assert_eq!(full.path, format!("block-7/{}/4955w.png", image_id));

    let preview = &metadata.levels[1];
    assert_eq!(preview.purpose, LevelPurpose::Preview);
    assert_eq!((preview.width, preview.height), (2477, 1751));
    assert_eq!(preview.path, format!("block-7/{}/2477w.jpg", image_id));

    // Full level is the original, byte for byte
    let stored_full = fixture.blobs.get(&full.path).await.unwrap();
    assert_eq!(stored_full, original);

    let stored_preview = fixture.blobs.get(&preview.path).await.unwrap();
    assert!(is_valid_jpeg(&stored_preview));
    assert_eq!(dimensions_of(&stored_preview), (2477, 1751));
    assert_eq!(preview.byte_size, stored_preview.len() as u64);

    // Descriptor is readable by id
    let stored = fixture.metadata.get(image_id).await.unwrap();
    assert_eq!(stored, metadata);

    // Stored objects are exactly the referenced levels
    assert_eq!(
        fixture.blobs.paths().await,
        vec![preview.path.clone(), full.path.clone()]
    );
}

#[tokio::test]
async fn test_heavy_but_small_upload_gets_preview() {
    let fixture = MemoryFixture::new();
    let original = noise_png(700, 700, 42);
    assert!(original.len() > 1_000_000, "fixture must exceed the byte ceiling");

    let outcome = fixture
        .ingest
        .ingest("task-1", Bytes::from(original))
        .await
        .unwrap();

    assert_eq!(outcome.decision, Decision::MultiLevel);
    let metadata = outcome.metadata.unwrap();
    assert_eq!(metadata.preview().unwrap().width, 350);
    assert_eq!(metadata.preview().unwrap().height, 350);
}

#[tokio::test]
async fn test_small_photo_stays_single_level() {
    let fixture = MemoryFixture::new();
    let original = Bytes::from(gradient_png(904, 1280));
    assert!(original.len() < 1_000_000);

    let outcome = fixture
        .ingest
        .ingest("task-9", original.clone())
        .await
        .unwrap();

    assert_eq!(outcome.decision, Decision::SingleLevel);
    let metadata = outcome.metadata.unwrap();
    assert_eq!(metadata.levels.len(), 1);

    let level = &metadata.levels[0];
    assert_eq!(level.purpose, LevelPurpose::Full);
    assert_eq!((level.width, level.height), (904, 1280));
    assert_eq!(level.path, format!("task-9/{}.png", outcome.image.image_id));
    assert_eq!(fixture.blobs.get(&level.path).await.unwrap(), original);

    // Nothing but the original was written
    assert_eq!(fixture.blobs.paths().await, vec![level.path.clone()]);
}

#[tokio::test]
async fn test_garbage_upload_is_rejected_without_writes() {
    let fixture = MemoryFixture::new();

    let result = fixture
        .ingest
        .ingest("task-1", Bytes::from_static(b"definitely not an image"))
        .await;

    assert!(matches!(result, Err(PyramidError::UnsupportedFormat { .. })));
    assert!(fixture.blobs.is_empty().await);
    assert!(fixture.metadata.is_empty().await);
}

#[tokio::test]
async fn test_each_upload_gets_a_fresh_id() {
    let fixture = MemoryFixture::new();
    let original = Bytes::from(gradient_png(64, 64));

    let first = fixture.ingest.ingest("c", original.clone()).await.unwrap();
    let second = fixture.ingest.ingest("c", original).await.unwrap();

    assert_ne!(first.image.image_id, second.image.image_id);
    assert_eq!(fixture.metadata.len().await, 2);
}

#[tokio::test]
async fn test_truncated_upload_is_rejected_without_writes() {
    let fixture = MemoryFixture::new();
    let mut original = gradient_png(100, 100);
    original.truncate(60);
    // Header alone still reads fine
    assert_eq!(
        image::ImageReader::new(std::io::Cursor::new(&original))
            .with_guessed_format()
            .unwrap()
            .into_dimensions()
            .unwrap(),
        (100, 100)
    );

    let result = fixture.ingest.ingest("task-1", Bytes::from(original)).await;

    assert!(matches!(result, Err(PyramidError::UnsupportedFormat { .. })));
    assert!(fixture.blobs.is_empty().await);
    assert!(fixture.metadata.is_empty().await);
}

#[tokio::test]
async fn test_deferred_truncated_upload_is_rejected_before_staging() {
    let blobs = RecordingBlobStore::new();
    let metadata = MemoryMetadataStore::new();
    let pipeline = pipeline(Arc::new(blobs.clone()), Arc::new(metadata.clone()));
    let (_worker, queue) = DerivationWorker::new(pipeline.clone(), 8, 3);
    let ingest = IngestService::deferred(pipeline, queue);

    let mut original = gradient_png(100, 100);
    original.truncate(60);
    let result = ingest.ingest("task-1", Bytes::from(original)).await;

    assert!(matches!(result, Err(PyramidError::UnsupportedFormat { .. })));
    assert!(blobs.puts().await.is_empty());
}

// =============================================================================
// Publishing Order and Failures
// =============================================================================

#[tokio::test]
async fn test_levels_written_before_descriptor() {
    let blobs = RecordingBlobStore::new();
    let metadata = FlakyMetadataStore::failing_times(0);
    let ingest = IngestService::inline(pipeline(
        Arc::new(blobs.clone()),
        Arc::new(metadata.clone()),
    ));

    let outcome = ingest
        .ingest("block-1", Bytes::from(gradient_png(2100, 300)))
        .await
        .unwrap();

    let mut puts = blobs.puts().await;
    puts.sort();
    let image_id = &outcome.image.image_id;
    // Each level exactly once; no separate copy of the original
    assert_eq!(
        puts,
        vec![
            format!("block-1/{}/1050w.jpg", image_id),
            format!("block-1/{}/2100w.png", image_id),
        ]
    );

    assert_eq!(metadata.attempts(), 1);
    assert!(metadata.get(image_id).await.is_ok());
}

#[tokio::test]
async fn test_failed_preview_write_publishes_nothing() {
    let blobs = RecordingBlobStore::failing_on("w.jpg");
    let metadata = MemoryMetadataStore::new();
    let ingest = IngestService::inline(pipeline(
        Arc::new(blobs.clone()),
        Arc::new(metadata.clone()),
    ));

    let result = ingest
        .ingest("block-1", Bytes::from(gradient_png(2100, 300)))
        .await;

    match result {
        Err(PyramidError::PersistFailure(StoreError::Unavailable(_))) => {}
        other => panic!("expected PersistFailure, got {:?}", other),
    }
    assert!(metadata.is_empty().await);
}

#[tokio::test]
async fn test_failed_descriptor_write_is_persist_failure() {
    let blobs = RecordingBlobStore::new();
    let metadata = FlakyMetadataStore::failing_times(1);
    let ingest = IngestService::inline(pipeline(
        Arc::new(blobs.clone()),
        Arc::new(metadata.clone()),
    ));

    let result = ingest.ingest("c", Bytes::from(gradient_png(32, 32))).await;

    let err = result.unwrap_err();
    assert!(matches!(err, PyramidError::PersistFailure(_)));
    assert!(err.is_retryable());
}

// =============================================================================
// Deferred Ingest
// =============================================================================

#[tokio::test]
async fn test_deferred_ingest_publishes_in_background() {
    let blobs = RecordingBlobStore::new();
    let metadata = MemoryMetadataStore::new();
    let pipeline = pipeline(Arc::new(blobs.clone()), Arc::new(metadata.clone()));

    let (worker, queue) = DerivationWorker::new(pipeline.clone(), 8, 3);
    let handle = worker.spawn();
    let ingest = IngestService::deferred(pipeline, queue);
    assert_eq!(ingest.mode(), IngestMode::Deferred);

    let outcome = ingest
        .ingest("block-2", Bytes::from(gradient_png(2100, 300)))
        .await
        .unwrap();

    assert!(outcome.deferred);
    assert!(outcome.metadata.is_none());
    assert_eq!(outcome.decision, Decision::MultiLevel);

    // Closing the queue lets the worker drain and stop
    drop(ingest);
    handle.await.unwrap();

    let stored = metadata.get(&outcome.image.image_id).await.unwrap();
    assert!(stored.is_multi_level());
    assert_eq!(stored.preview().unwrap().width, 1050);

    // Staged original doubles as the full level
    let mut referenced: Vec<String> = stored.levels.iter().map(|l| l.path.clone()).collect();
    referenced.sort();
    assert_eq!(blobs.memory().paths().await, referenced);
}

#[tokio::test]
async fn test_deferred_worker_retries_unavailable_store() {
    let blobs = RecordingBlobStore::new();
    let metadata = FlakyMetadataStore::failing_times(2);
    let pipeline = pipeline(Arc::new(blobs.clone()), Arc::new(metadata.clone()));

    let (worker, queue) = DerivationWorker::new(pipeline.clone(), 8, 5);
    let handle = worker.with_retry_delay(Duration::from_millis(1)).spawn();
    let ingest = IngestService::deferred(pipeline, queue);

    let outcome = ingest
        .ingest("c", Bytes::from(gradient_png(48, 48)))
        .await
        .unwrap();

    drop(ingest);
    handle.await.unwrap();

    assert_eq!(metadata.attempts(), 3);
    assert!(metadata.get(&outcome.image.image_id).await.is_ok());
}

#[tokio::test]
async fn test_deferred_worker_gives_up_after_max_attempts() {
    let blobs = RecordingBlobStore::new();
    let metadata = FlakyMetadataStore::failing_times(10);
    let pipeline = pipeline(Arc::new(blobs.clone()), Arc::new(metadata.clone()));

    let (worker, queue) = DerivationWorker::new(pipeline.clone(), 8, 2);
    let handle = worker.with_retry_delay(Duration::from_millis(1)).spawn();
    let ingest = IngestService::deferred(pipeline, queue);

    let outcome = ingest
        .ingest("c", Bytes::from(gradient_png(48, 48)))
        .await
        .unwrap();

    drop(ingest);
    handle.await.unwrap();

    assert_eq!(metadata.attempts(), 2);
    assert!(matches!(
        metadata.get(&outcome.image.image_id).await,
        Err(StoreError::NotFound(_))
    ));
}
