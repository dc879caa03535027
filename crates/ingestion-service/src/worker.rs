//! Ingest worker - processes queued images through the metric processor
//!
//! Pops image ids from the durable queue, runs them through the external
//! processor, and hands successes to the shelf aggregator. Processing and
//! storage failures become a status of Failed on the image; they are never
//! surfaced to the submitting caller, whose request already completed.

use crate::object_store::{processed_object_key, ObjectStore};
use crate::processor::MetricProcessor;
use crate::shelf::ShelfAggregator;
use crate::storage::Storage;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Background ingest worker
pub struct Worker {
    storage: Storage,
    object_store: Arc<dyn ObjectStore>,
    processor: Arc<dyn MetricProcessor>,
    aggregator: ShelfAggregator,
}

impl Worker {
    pub fn new(
        storage: Storage,
        object_store: Arc<dyn ObjectStore>,
        processor: Arc<dyn MetricProcessor>,
    ) -> Self {
        let aggregator = ShelfAggregator::new(storage.clone(), object_store.clone());
        Self {
            storage,
            object_store,
            processor,
            aggregator,
        }
    }

    /// Re-queue every job whose image never reached a terminal status.
    /// Run once at startup; closes the crash window between a 202
    /// acknowledgment and the background task completing.
    pub async fn recover_incomplete(&mut self) -> Result<usize> {
        let ids = self.storage.incomplete_jobs().await?;

        // An id can be in the processing set AND still in the queue when
        // the crash hit before any worker popped it. Re-queueing those
        // would hand the same image to two workers, so skip them.
        let queued: HashSet<String> = self.storage.queued_jobs().await?.into_iter().collect();

        let mut requeued = 0;
        for image_id in ids {
            if queued.contains(&image_id) {
                debug!("Job {} still queued, leaving as is", image_id);
                continue;
            }

            match self.storage.get_image(&image_id).await? {
                Some(image) if !image.status.is_terminal() => {
                    self.storage.requeue_ingest(&image_id).await?;
                    requeued += 1;
                }
                // Terminal or vanished: stale processing-set entry
                _ => {
                    self.storage.clear_in_flight(&image_id).await?;
                }
            }
        }

        if requeued > 0 {
            info!("Recovered {} incomplete ingest jobs", requeued);
        }

        Ok(requeued)
    }

    /// Start the worker loop
    pub async fn run(&mut self) -> Result<()> {
        info!("Ingest worker started, waiting for jobs...");

        loop {
            match self.process_next(5.0).await {
                Ok(_) => {}
                Err(e) => {
                    error!("Error popping job from queue: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Pop and handle one job. Returns false when the pop timed out with
    /// an empty queue.
    pub async fn process_next(&mut self, timeout_secs: f64) -> Result<bool> {
        match self.storage.pop_job(timeout_secs).await? {
            Some(image_id) => {
                self.handle_job(&image_id).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drive one image to a terminal status. Never propagates processing
    /// errors; they end up on the image record.
    async fn handle_job(&mut self, image_id: &str) {
        info!("Processing ingest job: {}", image_id);

        let mut image = match self.storage.get_image(image_id).await {
            Ok(Some(image)) => image,
            Ok(None) => {
                warn!("Queued image {} no longer exists", image_id);
                if let Err(e) = self.storage.clear_in_flight(image_id).await {
                    error!("Failed to clear in-flight marker: {}", e);
                }
                return;
            }
            Err(e) => {
                error!("Failed to load image {}: {}", image_id, e);
                return;
            }
        };

        // Duplicate queue entries are possible after recovery; terminal
        // images are simply skipped
        if image.status.is_terminal() {
            debug!("Image {} already {:?}, skipping", image_id, image.status);
            if let Err(e) = self.storage.clear_in_flight(image_id).await {
                error!("Failed to clear in-flight marker: {}", e);
            }
            return;
        }

        match self.process_image(&mut image).await {
            Ok(shelf_id) => {
                info!("Ingest job completed: {} -> shelf {}", image_id, shelf_id);
                if let Err(e) = self.storage.clear_in_flight(image_id).await {
                    error!("Failed to clear in-flight marker: {}", e);
                }
            }
            Err(e) => {
                error!("Ingest job failed: {} - {}", image_id, e);
                image.mark_failed(e.to_string());

                match self.storage.update_image(&image).await {
                    Ok(()) => {
                        if let Err(e) = self.storage.clear_in_flight(image_id).await {
                            error!("Failed to clear in-flight marker: {}", e);
                        }
                    }
                    Err(e) => {
                        // Leave the id in the processing set; the startup
                        // re-scan will retry it
                        error!("Failed to persist failure for {}: {}", image_id, e);
                    }
                }
            }
        }
    }

    /// The success path: blob -> processor -> processed copy -> shelf
    async fn process_image(&mut self, image: &mut crate::models::ImageDoc) -> shelf_common::Result<String> {
        let bytes = self.object_store.get(&image.storage_key).await?;

        let filename = image
            .storage_key
            .rsplit('/')
            .next()
            .unwrap_or(&image.storage_key)
            .to_string();

        let result = self.processor.process(bytes, &filename).await?;

        // Keep the processor's annotated rendering next to the original
        self.object_store
            .put(
                &processed_object_key(&image.storage_key),
                result.image_bytes,
                "image/png",
            )
            .await?;

        self.aggregator
            .attach_processed_image(image, &result.metrics)
            .await
    }
}
