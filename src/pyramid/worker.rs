//! Deferred derivation.
//!
//! When uploads must return quickly, the ingest path only stages the original
//! at its `full` level path and enqueues a [`DerivationTask`]. A background
//! [`DerivationWorker`] reads the original back from there, derives and
//! publishes. Failed
//! publishes are retried, so a task may run more than once; derivation is
//! deterministic and publishing replaces whole objects, which makes repeats
//! harmless.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ingest::{DerivationPipeline, Published};
use super::policy::Decision;
use crate::error::{PyramidError, StoreError};
use crate::model::Image;

/// Default queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default number of attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts; doubled after each failure.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// A unit of deferred derivation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationTask {
    /// Image being derived
    pub image: Image,

    /// Threshold decision made at ingest time
    pub decision: Decision,

    /// Blob store path the original was staged at
    pub source_path: String,
}

/// Sending half of the derivation queue.
#[derive(Clone)]
pub struct DerivationQueue {
    sender: mpsc::Sender<DerivationTask>,
}

impl DerivationQueue {
    /// Enqueue derivation for `image`.
    ///
    /// Waits for queue space. Fails with `PersistFailure` if the worker has
    /// shut down, since the pyramid could then never be published.
    pub async fn submit(
        &self,
        image: Image,
        decision: Decision,
        source_path: String,
    ) -> Result<(), PyramidError> {
        let image_id = image.image_id.clone();
        self.sender
            .send(DerivationTask {
                image,
                decision,
                source_path,
            })
            .await
            .map_err(|_| {
                PyramidError::PersistFailure(StoreError::Unavailable(
                    "derivation queue is closed".to_string(),
                ))
            })?;
        debug!(image_id = %image_id, "Queued derivation");
        Ok(())
    }
}

/// Background consumer of the derivation queue.
pub struct DerivationWorker {
    pipeline: DerivationPipeline,
    receiver: mpsc::Receiver<DerivationTask>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl DerivationWorker {
    /// Create a worker and its queue.
    pub fn new(
        pipeline: DerivationPipeline,
        capacity: usize,
        max_attempts: u32,
    ) -> (Self, DerivationQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = Self {
            pipeline,
            receiver,
            max_attempts: max_attempts.max(1),
            retry_delay: RETRY_BASE_DELAY,
        };
        (worker, DerivationQueue { sender })
    }

    /// Override the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the worker onto the runtime.
    ///
    /// The task finishes once every [`DerivationQueue`] handle is dropped and
    /// the queue is drained.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process tasks until the queue closes.
    pub async fn run(mut self) {
        info!(max_attempts = self.max_attempts, "Derivation worker started");

        while let Some(task) = self.receiver.recv().await {
            let image_id = task.image.image_id.clone();
            match self.deliver(&task).await {
                Ok(published) => info!(
                    image_id = %image_id,
                    levels = published.metadata.levels.len(),
                    fallback = published.fallback,
                    "Deferred derivation complete"
                ),
                Err(e) => error!(
                    image_id = %image_id,
                    error = %e,
                    "Deferred derivation abandoned"
                ),
            }
        }

        info!("Derivation worker stopped");
    }

    /// Run one task, redelivering it while failures are retryable.
    pub async fn deliver(&self, task: &DerivationTask) -> Result<Published, PyramidError> {
        let mut delay = self.retry_delay;
        let mut attempt = 1;

        loop {
            match self.process(task).await {
                Ok(published) => return Ok(published),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        image_id = %task.image.image_id,
                        attempt,
                        error = %e,
                        "Derivation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one attempt of a task from scratch.
    pub async fn process(&self, task: &DerivationTask) -> Result<Published, PyramidError> {
        let original = self
            .pipeline
            .publisher()
            .blob_store()
            .get(&task.source_path)
            .await
            .map_err(PyramidError::PersistFailure)?;

        self.pipeline.run(&task.image, original, task.decision).await
    }
}
