//! Data models for the ingestion service
//!
//! Documents are stored as JSON in Redis; wire types use camelCase because
//! the mobile client and the original API speak camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shelf_common::{GeoPoint, ImageStatus, MetricSummary};
use uuid::Uuid;

/// A captured shelf photograph and its processing lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDoc {
    /// Unique image identifier
    pub image_id: String,

    /// Owning user
    pub user_id: String,

    /// Shelf this image was aggregated into, set together with
    /// status Uploaded in a single write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shelf_id: Option<String>,

    /// Capture geolocation
    pub location: GeoPoint,

    /// Capture timestamp (UTC, supplied by the client)
    pub capture_date_time: DateTime<Utc>,

    /// Raw upload size in kilobytes
    pub image_size_kb: u64,

    /// Object-storage URL of the raw upload (empty if the put failed)
    pub image_url: String,

    /// Object-storage key of the raw upload
    pub storage_key: String,

    /// Hex SHA-256 of the raw bytes, used for offline-sync dedup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,

    pub status: ImageStatus,

    /// Whether this submission came through the offline-sync endpoint,
    /// which selects the shelf merge policy in the worker
    #[serde(default)]
    pub offline_sync: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Failure detail (only on status Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageDoc {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        location: GeoPoint,
        capture_date_time: DateTime<Utc>,
        image_size_kb: u64,
        image_url: String,
        storage_key: String,
        file_hash: Option<String>,
        status: ImageStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            image_id: Uuid::new_v4().to_string(),
            user_id,
            shelf_id: None,
            location,
            capture_date_time,
            image_size_kb,
            image_url,
            storage_key,
            file_hash,
            status,
            offline_sync: false,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Attach to a shelf and mark processed. Returns false if the status
    /// machine forbids the transition (already terminal).
    pub fn mark_uploaded(&mut self, shelf_id: String) -> bool {
        if !self.status.can_transition_to(ImageStatus::Uploaded) {
            return false;
        }
        self.status = ImageStatus::Uploaded;
        self.shelf_id = Some(shelf_id);
        self.error = None;
        self.updated_at = Utc::now();
        true
    }

    /// Mark processing as failed. No shelf is ever attached to a failed
    /// image. Returns false if already terminal.
    pub fn mark_failed(&mut self, error: String) -> bool {
        if !self.status.can_transition_to(ImageStatus::Failed) {
            return false;
        }
        self.status = ImageStatus::Failed;
        self.shelf_id = None;
        self.error = Some(error);
        self.updated_at = Utc::now();
        true
    }

    /// Re-submission via offline sync starts a fresh processing attempt on
    /// the same record. The forward-only status machine governs a single
    /// attempt; this resets the record for the next one.
    pub fn reset_for_resubmission(
        &mut self,
        image_size_kb: u64,
        image_url: String,
        storage_key: String,
    ) {
        self.image_size_kb = image_size_kb;
        self.image_url = image_url;
        self.storage_key = storage_key;
        self.shelf_id = None;
        self.error = None;
        self.status = ImageStatus::Processing;
        self.offline_sync = true;
        self.updated_at = Utc::now();
    }
}

/// A shelf: one or more images captured together plus their metric summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfDoc {
    pub shelf_id: String,

    /// Owning user; every referenced image belongs to the same user
    pub user_id: String,

    /// Member images, insertion-ordered, no duplicates
    pub image_ids: Vec<String>,

    /// Fixed-point two-decimal scores on the 0-100 scale
    pub metric_summary: MetricSummary,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShelfDoc {
    pub fn new(user_id: String, image_ids: Vec<String>, metric_summary: MetricSummary) -> Self {
        let now = Utc::now();
        Self {
            shelf_id: Uuid::new_v4().to_string(),
            user_id,
            image_ids,
            metric_summary,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add an image reference, deduplicating by id
    pub fn merge_image(&mut self, image_id: &str) {
        if !self.image_ids.iter().any(|id| id == image_id) {
            self.image_ids.push(image_id.to_string());
        }
        self.updated_at = Utc::now();
    }

    pub fn set_metrics(&mut self, metric_summary: MetricSummary) {
        self.metric_summary = metric_summary;
        self.updated_at = Utc::now();
    }
}

/// Role consulted by the admin endpoints. User provisioning itself happens
/// upstream; this service only reads the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub user_id: String,
    pub role: UserRole,
}

/// Uniform response envelope for every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub message: String,
    pub status: String,
    pub code: u16,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn success(code: u16, message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            status: "success".to_string(),
            code,
            data: Some(data),
        }
    }
}

/// Payload of the 202 upload acknowledgment. The shelf does not exist yet;
/// its id becomes visible through the status endpoint once processing
/// completes.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub shelf_id: Option<String>,
    pub images: Vec<String>,
}

/// Payload of the status endpoint
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: ImageStatus,
    pub shelf_id: Option<String>,
    pub image_url: String,
}

/// A shelf with its member image documents embedded
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfWithImages {
    #[serde(flatten)]
    pub shelf: ShelfDoc,
    pub images: Vec<ImageDoc>,
}

/// Result of a cascading shelf delete
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfDeleted {
    pub shelf_id: String,
    pub deleted_images: Vec<String>,
}

/// One row of the admin shelf report
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminShelfRow {
    /// First image's capture coordinates, rounded to 4 decimals;
    /// None when the shelf has no resolvable image
    pub location: Option<AdminCoords>,

    #[serde(rename = "OSA")]
    pub osa: String,
    #[serde(rename = "SOS")]
    pub sos: String,
    #[serde(rename = "PGC")]
    pub pgc: String,

    pub image_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminCoords {
    pub lat: f64,
    pub long: f64,
}

/// Aggregate counters for the admin dashboard
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_users: usize,
    pub total_shelves: usize,
    pub images_pending: usize,
    pub images_processing: usize,
    pub images_uploaded: usize,
    pub images_failed: usize,
    pub queue_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_common::MetricScores;

    fn test_image(status: ImageStatus) -> ImageDoc {
        ImageDoc::new(
            "user-1".to_string(),
            GeoPoint::parse("75.8577,22.7196").unwrap(),
            Utc::now(),
            120,
            "http://store/images/a.jpg".to_string(),
            "images/a.jpg".to_string(),
            Some("abc123".to_string()),
            status,
        )
    }

    #[test]
    fn test_mark_uploaded_sets_shelf_atomically() {
        let mut image = test_image(ImageStatus::Processing);
        assert!(image.mark_uploaded("shelf-1".to_string()));
        assert_eq!(image.status, ImageStatus::Uploaded);
        assert_eq!(image.shelf_id.as_deref(), Some("shelf-1"));
    }

    #[test]
    fn test_mark_failed_clears_shelf() {
        let mut image = test_image(ImageStatus::Processing);
        assert!(image.mark_failed("network error".to_string()));
        assert_eq!(image.status, ImageStatus::Failed);
        assert!(image.shelf_id.is_none());
        assert_eq!(image.error.as_deref(), Some("network error"));
    }

    #[test]
    fn test_terminal_image_rejects_further_marks() {
        let mut image = test_image(ImageStatus::Processing);
        assert!(image.mark_uploaded("shelf-1".to_string()));
        assert!(!image.mark_failed("late failure".to_string()));
        assert_eq!(image.status, ImageStatus::Uploaded);
        assert_eq!(image.shelf_id.as_deref(), Some("shelf-1"));
    }

    #[test]
    fn test_shelf_merge_deduplicates() {
        let mut shelf = ShelfDoc::new(
            "user-1".to_string(),
            vec!["img-1".to_string()],
            MetricScores::new(10.0, 20.0, 30.0).summary(),
        );
        shelf.merge_image("img-2");
        shelf.merge_image("img-1");
        assert_eq!(shelf.image_ids, vec!["img-1", "img-2"]);
    }

    #[test]
    fn test_resubmission_resets_lifecycle() {
        let mut image = test_image(ImageStatus::Processing);
        image.mark_failed("boom".to_string());

        image.reset_for_resubmission(
            140,
            "http://store/images/b.jpg".to_string(),
            "images/b.jpg".to_string(),
        );
        assert_eq!(image.status, ImageStatus::Processing);
        assert!(image.offline_sync);
        assert!(image.error.is_none());
        assert!(image.shelf_id.is_none());
    }
}
