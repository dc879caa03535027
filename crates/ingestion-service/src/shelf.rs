//! Shelf aggregation
//!
//! Attaches processed images to shelves and owns the cascading delete. The
//! default policy creates one shelf per processed image; offline-sync
//! submissions instead merge into an existing shelf of the same submission
//! when one exists.

use crate::models::{ImageDoc, ShelfDeleted, ShelfDoc};
use crate::object_store::{processed_object_key, ObjectStore};
use crate::storage::Storage;
use shelf_common::{Error, MetricScores, Result};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ShelfAggregator {
    storage: Storage,
    object_store: Arc<dyn ObjectStore>,
}

impl ShelfAggregator {
    pub fn new(storage: Storage, object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage,
            object_store,
        }
    }

    /// Attach a successfully processed image to a shelf and finalize the
    /// image record. The shelf reference and status Uploaded land in one
    /// document write, so a status poller never observes one without the
    /// other.
    pub async fn attach_processed_image(
        &mut self,
        image: &mut ImageDoc,
        metrics: &MetricScores,
    ) -> Result<String> {
        let summary = metrics.summary();

        let existing = if image.offline_sync {
            self.storage
                .find_shelf_for_submission(&image.user_id, image.capture_date_time)
                .await.map_err(Error::persistence)?
        } else {
            None
        };

        let shelf_id = match existing {
            Some(mut shelf) => {
                shelf.merge_image(&image.image_id);
                // Merge rule: last write wins, the newest image's metrics
                // become the shelf summary
                shelf.set_metrics(summary);
                self.storage.update_shelf(&shelf).await.map_err(Error::persistence)?;

                info!(
                    "Merged image {} into shelf {} ({} images)",
                    image.image_id,
                    shelf.shelf_id,
                    shelf.image_ids.len()
                );
                shelf.shelf_id
            }
            None => {
                let shelf = ShelfDoc::new(
                    image.user_id.clone(),
                    vec![image.image_id.clone()],
                    summary,
                );
                self.storage.insert_shelf(&shelf).await.map_err(Error::persistence)?;
                shelf.shelf_id
            }
        };

        if image.mark_uploaded(shelf_id.clone()) {
            self.storage.update_image(image).await.map_err(Error::persistence)?;
        } else {
            warn!(
                "Image {} already terminal ({:?}), not finalizing",
                image.image_id, image.status
            );
        }

        Ok(shelf_id)
    }

    /// Delete a shelf owned by `user_id`, cascading to its images and
    /// their blobs. Unowned and unknown shelves are indistinguishable to
    /// the caller.
    pub async fn delete_shelf_cascade(
        &mut self,
        user_id: &str,
        shelf_id: &str,
    ) -> Result<ShelfDeleted> {
        let shelf = match self.storage.get_shelf(shelf_id).await.map_err(Error::persistence)? {
            Some(shelf) if shelf.user_id == user_id => shelf,
            _ => return Err(Error::NotFound("Shelf".to_string())),
        };

        let mut deleted_images = Vec::new();

        for image_id in &shelf.image_ids {
            let Some(image) = self.storage.get_image(image_id).await.map_err(Error::persistence)? else {
                continue;
            };

            // Blob deletes are best effort; a dangling blob is preferable
            // to a half-deleted shelf
            if !image.storage_key.is_empty() {
                if let Err(e) = self.object_store.delete(&image.storage_key).await {
                    warn!("Failed to delete blob {}: {}", image.storage_key, e);
                }
                let processed = processed_object_key(&image.storage_key);
                if let Err(e) = self.object_store.delete(&processed).await {
                    warn!("Failed to delete blob {}: {}", processed, e);
                }
            }

            self.storage.delete_image(&image).await.map_err(Error::persistence)?;
            deleted_images.push(image.image_id);
        }

        self.storage.delete_shelf(&shelf).await.map_err(Error::persistence)?;

        info!(
            "Deleted shelf {} and {} images for user {}",
            shelf_id,
            deleted_images.len(),
            user_id
        );

        Ok(ShelfDeleted {
            shelf_id: shelf_id.to_string(),
            deleted_images,
        })
    }
}
