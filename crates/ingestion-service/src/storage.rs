//! Redis storage for images, shelves and the durable ingest queue
//!
//! Documents are JSON strings under `image:{id}` / `shelf:{id}` with set
//! indexes per user. The ingest queue is a Redis list consumed with BLPOP;
//! `ingest:processing` holds every job id whose image is not yet terminal,
//! which is what the crash-recovery scan walks at startup.

use crate::models::{ImageDoc, ShelfDoc, UserDoc, UserRole};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use shelf_common::ImageStatus;
use tracing::{debug, info};

const QUEUE_KEY: &str = "ingest:queue";
const PROCESSING_KEY: &str = "ingest:processing";

/// Storage backend for the ingestion service
#[derive(Clone)]
pub struct Storage {
    conn: ConnectionManager,
}

impl Storage {
    /// Create a new storage instance
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    /// Verify the connection is alive
    pub async fn health_check(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn)
            .await
            .context("Redis ping failed")?;
        Ok(())
    }

    // ----- images -----

    /// Persist a new image document and its indexes
    pub async fn insert_image(&mut self, image: &ImageDoc) -> Result<()> {
        let key = image_key(&image.image_id);

        let json = serde_json::to_string(image).context("Failed to serialize image")?;
        let _: () = self.conn.set(&key, &json).await?;

        let _: () = self
            .conn
            .sadd(user_images_key(&image.user_id), &image.image_id)
            .await?;
        let _: () = self.conn.sadd("images:all", &image.image_id).await?;
        let _: () = self.conn.sadd("users:seen", &image.user_id).await?;

        if let Some(hash) = &image.file_hash {
            let lookup = hash_lookup_key(&image.user_id, hash, image.capture_date_time);
            let _: () = self.conn.set(&lookup, &image.image_id).await?;
        }

        debug!("Inserted image: {} for user: {}", image.image_id, image.user_id);
        Ok(())
    }

    /// Get an image by id
    pub async fn get_image(&mut self, image_id: &str) -> Result<Option<ImageDoc>> {
        let json: Option<String> = self.conn.get(image_key(image_id)).await?;

        match json {
            Some(data) => {
                let image: ImageDoc =
                    serde_json::from_str(&data).context("Failed to deserialize image")?;
                Ok(Some(image))
            }
            None => Ok(None),
        }
    }

    /// Overwrite an image document. A single SET, so a concurrent status
    /// poller sees either the old or the new document, never a mix.
    pub async fn update_image(&mut self, image: &ImageDoc) -> Result<()> {
        let json = serde_json::to_string(image).context("Failed to serialize image")?;
        let _: () = self.conn.set(image_key(&image.image_id), json).await?;

        debug!("Updated image: {} status: {:?}", image.image_id, image.status);
        Ok(())
    }

    /// Look up a previous submission by (user, content hash, capture time).
    /// Used by offline sync to skip images that already went through.
    pub async fn find_image_by_hash(
        &mut self,
        user_id: &str,
        file_hash: &str,
        capture_date_time: DateTime<Utc>,
    ) -> Result<Option<ImageDoc>> {
        let lookup = hash_lookup_key(user_id, file_hash, capture_date_time);
        let image_id: Option<String> = self.conn.get(&lookup).await?;

        match image_id {
            Some(id) => self.get_image(&id).await,
            None => Ok(None),
        }
    }

    /// Delete an image document and every index pointing at it
    pub async fn delete_image(&mut self, image: &ImageDoc) -> Result<()> {
        let _: () = self.conn.del(image_key(&image.image_id)).await?;
        let _: () = self
            .conn
            .srem(user_images_key(&image.user_id), &image.image_id)
            .await?;
        let _: () = self.conn.srem("images:all", &image.image_id).await?;
        let _: () = self.conn.srem(PROCESSING_KEY, &image.image_id).await?;

        if let Some(hash) = &image.file_hash {
            let lookup = hash_lookup_key(&image.user_id, hash, image.capture_date_time);
            let _: () = self.conn.del(&lookup).await?;
        }

        debug!("Deleted image: {}", image.image_id);
        Ok(())
    }

    // ----- ingest queue -----

    /// Enqueue an image for background processing. The id is added to the
    /// processing set BEFORE the queue push so a crash between the two
    /// leaves a recoverable record rather than a lost job.
    pub async fn queue_ingest(&mut self, image_id: &str) -> Result<()> {
        let _: () = self.conn.sadd(PROCESSING_KEY, image_id).await?;
        let _: () = self.conn.rpush(QUEUE_KEY, image_id).await?;

        info!("Queued ingest job: {}", image_id);
        Ok(())
    }

    /// Re-queue a job found incomplete at startup (already in the
    /// processing set)
    pub async fn requeue_ingest(&mut self, image_id: &str) -> Result<()> {
        let _: () = self.conn.rpush(QUEUE_KEY, image_id).await?;
        Ok(())
    }

    /// Pop the next job id from the queue (blocking, with timeout)
    pub async fn pop_job(&mut self, timeout_secs: f64) -> Result<Option<String>> {
        let result: Option<(String, String)> = self.conn.blpop(QUEUE_KEY, timeout_secs).await?;

        match result {
            Some((_, image_id)) => {
                debug!("Popped ingest job: {}", image_id);
                Ok(Some(image_id))
            }
            None => Ok(None),
        }
    }

    /// Remove a job from the processing set once its image reached a
    /// terminal status
    pub async fn clear_in_flight(&mut self, image_id: &str) -> Result<()> {
        let _: () = self.conn.srem(PROCESSING_KEY, image_id).await?;
        Ok(())
    }

    /// Job ids whose images never reached a terminal status
    pub async fn incomplete_jobs(&mut self) -> Result<Vec<String>> {
        let ids: Vec<String> = self.conn.smembers(PROCESSING_KEY).await?;
        Ok(ids)
    }

    /// Job ids currently waiting in the queue
    pub async fn queued_jobs(&mut self) -> Result<Vec<String>> {
        let ids: Vec<String> = self.conn.lrange(QUEUE_KEY, 0, -1).await?;
        Ok(ids)
    }

    /// Current queue length
    pub async fn queue_depth(&mut self) -> Result<usize> {
        let len: usize = self.conn.llen(QUEUE_KEY).await?;
        Ok(len)
    }

    // ----- shelves -----

    /// Persist a new shelf document and its indexes
    pub async fn insert_shelf(&mut self, shelf: &ShelfDoc) -> Result<()> {
        let json = serde_json::to_string(shelf).context("Failed to serialize shelf")?;
        let _: () = self.conn.set(shelf_key(&shelf.shelf_id), json).await?;

        let _: () = self
            .conn
            .sadd(user_shelves_key(&shelf.user_id), &shelf.shelf_id)
            .await?;
        let _: () = self.conn.sadd("shelves:all", &shelf.shelf_id).await?;

        info!("Created shelf: {} for user: {}", shelf.shelf_id, shelf.user_id);
        Ok(())
    }

    /// Get a shelf by id
    pub async fn get_shelf(&mut self, shelf_id: &str) -> Result<Option<ShelfDoc>> {
        let json: Option<String> = self.conn.get(shelf_key(shelf_id)).await?;

        match json {
            Some(data) => {
                let shelf: ShelfDoc =
                    serde_json::from_str(&data).context("Failed to deserialize shelf")?;
                Ok(Some(shelf))
            }
            None => Ok(None),
        }
    }

    /// Overwrite a shelf document
    pub async fn update_shelf(&mut self, shelf: &ShelfDoc) -> Result<()> {
        let json = serde_json::to_string(shelf).context("Failed to serialize shelf")?;
        let _: () = self.conn.set(shelf_key(&shelf.shelf_id), json).await?;

        debug!("Updated shelf: {} ({} images)", shelf.shelf_id, shelf.image_ids.len());
        Ok(())
    }

    /// Delete a shelf document and its indexes (images are deleted
    /// separately by the cascade)
    pub async fn delete_shelf(&mut self, shelf: &ShelfDoc) -> Result<()> {
        let _: () = self.conn.del(shelf_key(&shelf.shelf_id)).await?;
        let _: () = self
            .conn
            .srem(user_shelves_key(&shelf.user_id), &shelf.shelf_id)
            .await?;
        let _: () = self.conn.srem("shelves:all", &shelf.shelf_id).await?;

        info!("Deleted shelf: {}", shelf.shelf_id);
        Ok(())
    }

    /// All shelves of one user, newest first
    pub async fn get_user_shelves(&mut self, user_id: &str) -> Result<Vec<ShelfDoc>> {
        let shelf_ids: Vec<String> = self.conn.smembers(user_shelves_key(user_id)).await?;

        let mut shelves = Vec::new();
        for shelf_id in shelf_ids {
            if let Some(shelf) = self.get_shelf(&shelf_id).await? {
                shelves.push(shelf);
            }
        }

        shelves.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(shelves)
    }

    /// Every shelf in the system (admin report)
    pub async fn list_all_shelves(&mut self) -> Result<Vec<ShelfDoc>> {
        let shelf_ids: Vec<String> = self.conn.smembers("shelves:all").await?;

        let mut shelves = Vec::new();
        for shelf_id in shelf_ids {
            if let Some(shelf) = self.get_shelf(&shelf_id).await? {
                shelves.push(shelf);
            }
        }

        shelves.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(shelves)
    }

    /// Find a shelf of this user already holding any image from the same
    /// submission (same capture time). Offline-sync merge target.
    pub async fn find_shelf_for_submission(
        &mut self,
        user_id: &str,
        capture_date_time: DateTime<Utc>,
    ) -> Result<Option<ShelfDoc>> {
        let shelves = self.get_user_shelves(user_id).await?;

        for shelf in shelves {
            for image_id in &shelf.image_ids {
                if let Some(member) = self.get_image(image_id).await? {
                    if member.capture_date_time == capture_date_time {
                        return Ok(Some(shelf));
                    }
                }
            }
        }

        Ok(None)
    }

    // ----- users -----

    /// Store a user record (provisioned upstream; exposed for tests and
    /// seeding)
    pub async fn put_user(&mut self, user: &UserDoc) -> Result<()> {
        let json = serde_json::to_string(user).context("Failed to serialize user")?;
        let _: () = self.conn.set(user_key(&user.user_id), json).await?;
        let _: () = self.conn.sadd("users:seen", &user.user_id).await?;
        Ok(())
    }

    /// Get a user record
    pub async fn get_user(&mut self, user_id: &str) -> Result<Option<UserDoc>> {
        let json: Option<String> = self.conn.get(user_key(user_id)).await?;

        match json {
            Some(data) => {
                let user: UserDoc =
                    serde_json::from_str(&data).context("Failed to deserialize user")?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Whether the caller carries the admin role
    pub async fn is_admin(&mut self, user_id: &str) -> Result<bool> {
        Ok(self
            .get_user(user_id)
            .await?
            .map(|u| u.role == UserRole::Admin)
            .unwrap_or(false))
    }

    // ----- stats -----

    /// Image counts by status. Walks the full image index; fine at this
    /// scale, counters would be maintained separately beyond it.
    pub async fn image_status_counts(&mut self) -> Result<StatusCounts> {
        let image_ids: Vec<String> = self.conn.smembers("images:all").await?;

        let mut counts = StatusCounts::default();
        for image_id in image_ids {
            if let Some(image) = self.get_image(&image_id).await? {
                match image.status {
                    ImageStatus::Pending => counts.pending += 1,
                    ImageStatus::Processing => counts.processing += 1,
                    ImageStatus::Uploaded => counts.uploaded += 1,
                    ImageStatus::Failed => counts.failed += 1,
                }
            }
        }

        Ok(counts)
    }

    /// Number of distinct users that submitted images
    pub async fn count_users_seen(&mut self) -> Result<usize> {
        let count: usize = self.conn.scard("users:seen").await?;
        Ok(count)
    }

    /// Number of shelves in the system
    pub async fn count_shelves(&mut self) -> Result<usize> {
        let count: usize = self.conn.scard("shelves:all").await?;
        Ok(count)
    }
}

/// Image counts per status
#[derive(Debug, Default, serde::Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub uploaded: usize,
    pub failed: usize,
}

fn image_key(image_id: &str) -> String {
    format!("image:{}", image_id)
}

fn shelf_key(shelf_id: &str) -> String {
    format!("shelf:{}", shelf_id)
}

fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

fn user_images_key(user_id: &str) -> String {
    format!("images:user:{}", user_id)
}

fn user_shelves_key(user_id: &str) -> String {
    format!("shelves:user:{}", user_id)
}

fn hash_lookup_key(user_id: &str, file_hash: &str, capture: DateTime<Utc>) -> String {
    format!(
        "image:lookup:{}:{}:{}",
        user_id,
        file_hash,
        capture.timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageDoc;
    use shelf_common::GeoPoint;
    use uuid::Uuid;

    async fn get_test_storage() -> Storage {
        Storage::new("redis://127.0.0.1:6379/15")
            .await
            .expect("Failed to connect to test Redis")
    }

    fn test_image(user_id: &str) -> ImageDoc {
        ImageDoc::new(
            user_id.to_string(),
            GeoPoint::parse("75.8577,22.7196").unwrap(),
            Utc::now(),
            120,
            "http://store/shelf-images/images/a.jpg".to_string(),
            "images/a.jpg".to_string(),
            Some(Uuid::new_v4().to_string()),
            ImageStatus::Processing,
        )
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_insert_and_get_image() {
        let mut storage = get_test_storage().await;
        let user_id = Uuid::new_v4().to_string();
        let image = test_image(&user_id);

        storage.insert_image(&image).await.unwrap();

        let retrieved = storage
            .get_image(&image.image_id)
            .await
            .unwrap()
            .expect("Image not found");

        assert_eq!(retrieved.user_id, user_id);
        assert_eq!(retrieved.status, ImageStatus::Processing);
        assert_eq!(retrieved.image_size_kb, 120);
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_hash_lookup_roundtrip() {
        let mut storage = get_test_storage().await;
        let user_id = Uuid::new_v4().to_string();
        let image = test_image(&user_id);

        storage.insert_image(&image).await.unwrap();

        let found = storage
            .find_image_by_hash(
                &user_id,
                image.file_hash.as_ref().unwrap(),
                image.capture_date_time,
            )
            .await
            .unwrap()
            .expect("Lookup missed");
        assert_eq!(found.image_id, image.image_id);

        storage.delete_image(&image).await.unwrap();
        let gone = storage
            .find_image_by_hash(
                &user_id,
                image.file_hash.as_ref().unwrap(),
                image.capture_date_time,
            )
            .await
            .unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_queue_roundtrip() {
        let mut storage = get_test_storage().await;
        let user_id = Uuid::new_v4().to_string();
        let image = test_image(&user_id);

        storage.insert_image(&image).await.unwrap();
        storage.queue_ingest(&image.image_id).await.unwrap();

        let incomplete = storage.incomplete_jobs().await.unwrap();
        assert!(incomplete.contains(&image.image_id));

        let popped = storage.pop_job(1.0).await.unwrap();
        assert_eq!(popped.as_deref(), Some(image.image_id.as_str()));

        storage.clear_in_flight(&image.image_id).await.unwrap();
        let incomplete = storage.incomplete_jobs().await.unwrap();
        assert!(!incomplete.contains(&image.image_id));

        storage.delete_image(&image).await.unwrap();
    }
}
