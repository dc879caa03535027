//! API handlers for the ingestion service

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use shelf_common::{Error, GeoPoint, ImageStatus};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{
    models::{
        AdminCoords, AdminShelfRow, AdminStats, ApiEnvelope, ImageDoc, ShelfWithImages,
        StatusPayload, UploadAccepted,
    },
    object_store::{object_key, ObjectStore},
    shelf::ShelfAggregator,
    storage::Storage,
};

/// Shared application state
pub struct AppState {
    pub storage: Mutex<Storage>,
    pub aggregator: Mutex<ShelfAggregator>,
    pub object_store: Arc<dyn ObjectStore>,
    pub max_images_per_upload: usize,
}

/// API error type, rendered in the uniform response envelope
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "message": self.message,
            "status": "failed",
            "code": self.status.as_u16(),
            "data": null,
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Internal error: {:#}", err);
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Authorization(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Server-side detail is logged, not leaked
        let message = if err.is_client_error() {
            err.to_string()
        } else {
            error!("Internal error: {}", err);
            "Internal server error".to_string()
        };

        ApiError { status, message }
    }
}

/// Caller identity, injected as a header by the upstream auth gateway
fn caller_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation("missing user identity".to_string()).into())
}

/// One file pulled out of the upload form
struct UploadFile {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// Raw fields of the upload form before validation
#[derive(Default)]
struct UploadForm {
    location: Option<String>,
    capture_date_time: Option<String>,
    files: Vec<UploadFile>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from(Error::Validation(format!("malformed multipart body: {}", e))))?
    {
        match field.name().unwrap_or_default() {
            "location" => {
                form.location = Some(field.text().await.map_err(|e| {
                    ApiError::from(Error::Validation(format!("unreadable location field: {}", e)))
                })?);
            }
            "captureDateTime" => {
                form.capture_date_time = Some(field.text().await.map_err(|e| {
                    ApiError::from(Error::Validation(format!(
                        "unreadable captureDateTime field: {}",
                        e
                    )))
                })?);
            }
            "images" => {
                let filename = field.file_name().unwrap_or("upload.jpg").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| {
                        ApiError::from(Error::Validation(format!("unreadable image field: {}", e)))
                    })?
                    .to_vec();

                form.files.push(UploadFile {
                    filename,
                    content_type,
                    bytes,
                });
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Validate the upload inputs before any I/O happens. A rejected request
/// leaves no image record and no stored object behind.
fn validate_upload(
    form: &UploadForm,
    max_images: usize,
) -> Result<(GeoPoint, DateTime<Utc>), Error> {
    let location = form
        .location
        .as_deref()
        .ok_or_else(|| Error::Validation("missing location".to_string()))?;
    let capture = form
        .capture_date_time
        .as_deref()
        .ok_or_else(|| Error::Validation("missing captureDateTime".to_string()))?;

    let point = GeoPoint::parse(location)?;

    let capture_date_time = DateTime::parse_from_rfc3339(capture)
        .map_err(|_| Error::Validation(format!("invalid captureDateTime: {:?}", capture)))?
        .with_timezone(&Utc);

    if form.files.is_empty() {
        return Err(Error::Validation("no image files supplied".to_string()));
    }
    if form.files.len() > max_images {
        return Err(Error::Validation(format!(
            "at most {} images per upload",
            max_images
        )));
    }

    Ok((point, capture_date_time))
}

fn size_kb(bytes: &[u8]) -> u64 {
    (bytes.len() as u64 + 512) / 1024
}

/// Health check
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ingestion-service"
    }))
}

/// Accept an image upload and queue it for background processing.
/// Responds 202 before any metric computation happens.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiEnvelope<UploadAccepted>>), ApiError> {
    let user_id = caller_id(&headers)?;
    let form = read_upload_form(multipart).await?;
    let (point, capture_date_time) = validate_upload(&form, state.max_images_per_upload)?;

    info!("Upload: {} files from user {}", form.files.len(), user_id);

    let mut image_ids = Vec::new();

    for file in &form.files {
        let image_id =
            ingest_file(&state, &user_id, point, capture_date_time, file, false).await?;
        image_ids.push(image_id);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiEnvelope::success(
            202,
            "Upload accepted, processing in background",
            UploadAccepted {
                shelf_id: None,
                images: image_ids,
            },
        )),
    ))
}

/// Store one upload, persist its record and queue the ingest job.
/// A failed blob put persists the record as Failed and queues nothing.
async fn ingest_file(
    state: &AppState,
    user_id: &str,
    point: GeoPoint,
    capture_date_time: DateTime<Utc>,
    file: &UploadFile,
    offline_sync: bool,
) -> Result<String, ApiError> {
    let file_hash = hex::encode(Sha256::digest(&file.bytes));
    let kb = size_kb(&file.bytes);
    let key = object_key(&file.filename);

    let put_result = state
        .object_store
        .put(&key, file.bytes.clone(), &file.content_type)
        .await;

    let mut storage = state.storage.lock().await;

    match put_result {
        Ok(url) => {
            let mut image = ImageDoc::new(
                user_id.to_string(),
                point,
                capture_date_time,
                kb,
                url,
                key,
                Some(file_hash),
                ImageStatus::Processing,
            );
            image.offline_sync = offline_sync;

            storage.insert_image(&image).await?;
            storage.queue_ingest(&image.image_id).await?;

            Ok(image.image_id)
        }
        Err(e) => {
            error!("Blob put failed for {}: {}", file.filename, e);

            let mut image = ImageDoc::new(
                user_id.to_string(),
                point,
                capture_date_time,
                kb,
                String::new(),
                String::new(),
                Some(file_hash),
                ImageStatus::Failed,
            );
            image.error = Some(e.to_string());
            image.offline_sync = offline_sync;

            storage.insert_image(&image).await?;

            Ok(image.image_id)
        }
    }
}

/// Re-submit images captured offline. Files already uploaded successfully
/// (same user, content hash and capture time) are skipped; everything else
/// is re-uploaded and re-queued, and the worker merges the results into
/// the submission's shelf.
pub async fn sync_offline_upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiEnvelope<UploadAccepted>>), ApiError> {
    let user_id = caller_id(&headers)?;
    let form = read_upload_form(multipart).await?;
    let (point, capture_date_time) = validate_upload(&form, state.max_images_per_upload)?;

    info!(
        "Offline sync: {} files from user {}",
        form.files.len(),
        user_id
    );

    let mut image_ids = Vec::new();

    for file in &form.files {
        let file_hash = hex::encode(Sha256::digest(&file.bytes));

        let existing = {
            let mut storage = state.storage.lock().await;
            storage
                .find_image_by_hash(&user_id, &file_hash, capture_date_time)
                .await?
        };

        match existing {
            Some(image) if image.status == ImageStatus::Uploaded => {
                // Already went through; nothing to redo
                info!("Image {} already uploaded, skipping", image.image_id);
                image_ids.push(image.image_id);
            }
            Some(mut image) => {
                let kb = size_kb(&file.bytes);
                let key = object_key(&file.filename);

                let put_result = state
                    .object_store
                    .put(&key, file.bytes.clone(), &file.content_type)
                    .await;

                let mut storage = state.storage.lock().await;

                match put_result {
                    Ok(url) => {
                        image.reset_for_resubmission(kb, url, key);
                        storage.update_image(&image).await?;
                        storage.queue_ingest(&image.image_id).await?;
                    }
                    Err(e) => {
                        error!("Blob put failed for {}: {}", file.filename, e);
                        image.error = Some(e.to_string());
                        storage.update_image(&image).await?;
                    }
                }

                image_ids.push(image.image_id);
            }
            None => {
                let image_id =
                    ingest_file(&state, &user_id, point, capture_date_time, file, true).await?;
                image_ids.push(image_id);
            }
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiEnvelope::success(
            202,
            "Offline sync accepted, processing in background",
            UploadAccepted {
                shelf_id: None,
                images: image_ids,
            },
        )),
    ))
}

/// Current processing status of a previously submitted image
pub async fn image_status_handler(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> Result<Json<ApiEnvelope<StatusPayload>>, ApiError> {
    let mut storage = state.storage.lock().await;

    let image = storage
        .get_image(&image_id)
        .await?
        .ok_or_else(|| ApiError::from(Error::NotFound("Image".to_string())))?;

    Ok(Json(ApiEnvelope::success(
        200,
        "Image status fetched",
        StatusPayload {
            status: image.status,
            shelf_id: image.shelf_id,
            image_url: image.image_url,
        },
    )))
}

/// All shelves of the calling user, with member images embedded
pub async fn get_shelves_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<Vec<ShelfWithImages>>>, ApiError> {
    let user_id = caller_id(&headers)?;
    let mut storage = state.storage.lock().await;

    let shelves = storage.get_user_shelves(&user_id).await?;

    let mut result = Vec::with_capacity(shelves.len());
    for shelf in shelves {
        let mut images = Vec::with_capacity(shelf.image_ids.len());
        for image_id in &shelf.image_ids {
            if let Some(image) = storage.get_image(image_id).await? {
                images.push(image);
            }
        }
        result.push(ShelfWithImages { shelf, images });
    }

    Ok(Json(ApiEnvelope::success(
        200,
        "Shelves fetched successfully",
        result,
    )))
}

/// Delete a shelf owned by the caller, cascading to images and blobs
pub async fn delete_shelf_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(shelf_id): Path<String>,
) -> Result<Json<ApiEnvelope<crate::models::ShelfDeleted>>, ApiError> {
    let user_id = caller_id(&headers)?;

    let deleted = state
        .aggregator
        .lock()
        .await
        .delete_shelf_cascade(&user_id, &shelf_id)
        .await?;

    Ok(Json(ApiEnvelope::success(
        200,
        "Shelf and associated images deleted successfully",
        deleted,
    )))
}

async fn require_admin(storage: &mut Storage, user_id: &str) -> Result<(), ApiError> {
    if storage.is_admin(user_id).await? {
        Ok(())
    } else {
        Err(Error::Authorization("admin role required".to_string()).into())
    }
}

/// Admin report: one row per shelf across all users
pub async fn admin_shelves_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<Vec<AdminShelfRow>>>, ApiError> {
    let user_id = caller_id(&headers)?;
    let mut storage = state.storage.lock().await;
    require_admin(&mut storage, &user_id).await?;

    let shelves = storage.list_all_shelves().await?;

    let mut rows = Vec::with_capacity(shelves.len());
    for shelf in shelves {
        let location = match shelf.image_ids.first() {
            Some(first_id) => storage.get_image(first_id).await?.map(|image| AdminCoords {
                lat: round4(image.location.latitude),
                long: round4(image.location.longitude),
            }),
            None => None,
        };

        rows.push(AdminShelfRow {
            location,
            osa: shelf.metric_summary.osa.clone(),
            sos: shelf.metric_summary.sos.clone(),
            pgc: shelf.metric_summary.pgc.clone(),
            image_count: shelf.image_ids.len(),
        });
    }

    Ok(Json(ApiEnvelope::success(
        200,
        "All shelves fetched successfully",
        rows,
    )))
}

/// Admin counters: totals and current queue depth
pub async fn admin_stats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<AdminStats>>, ApiError> {
    let user_id = caller_id(&headers)?;
    let mut storage = state.storage.lock().await;
    require_admin(&mut storage, &user_id).await?;

    let counts = storage.image_status_counts().await?;
    let stats = AdminStats {
        total_users: storage.count_users_seen().await?,
        total_shelves: storage.count_shelves().await?,
        images_pending: counts.pending,
        images_processing: counts.processing,
        images_uploaded: counts.uploaded,
        images_failed: counts.failed,
        queue_depth: storage.queue_depth().await?,
    };

    Ok(Json(ApiEnvelope::success(
        200,
        "Stats fetched successfully",
        stats,
    )))
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(location: Option<&str>, capture: Option<&str>, files: usize) -> UploadForm {
        UploadForm {
            location: location.map(str::to_string),
            capture_date_time: capture.map(str::to_string),
            files: (0..files)
                .map(|i| UploadFile {
                    filename: format!("shelf_{}.jpg", i),
                    content_type: "image/jpeg".to_string(),
                    bytes: vec![0xFF, 0xD8, 0xFF],
                })
                .collect(),
        }
    }

    #[test]
    fn test_validate_upload_accepts_valid_input() {
        let form = form(Some("75.8577,22.7196"), Some("2025-07-10T08:50:32.354Z"), 2);
        let (point, capture) = validate_upload(&form, 20).unwrap();
        assert_eq!(point.longitude, 75.8577);
        assert_eq!(capture.timestamp_subsec_millis(), 354);
    }

    #[test]
    fn test_validate_upload_rejects_bad_longitude() {
        // Scenario: location "200,22" must fail before any I/O
        let form = form(Some("200,22"), Some("2025-07-10T08:50:32.354Z"), 1);
        let err = validate_upload(&form, 20).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_validate_upload_rejects_bad_timestamp() {
        let form = form(Some("75.8577,22.7196"), Some("yesterday"), 1);
        assert!(validate_upload(&form, 20).is_err());
    }

    #[test]
    fn test_validate_upload_rejects_missing_fields() {
        assert!(validate_upload(&form(None, Some("2025-07-10T08:50:32.354Z"), 1), 20).is_err());
        assert!(validate_upload(&form(Some("75,22"), None, 1), 20).is_err());
    }

    #[test]
    fn test_validate_upload_rejects_no_files() {
        let form = form(Some("75.8577,22.7196"), Some("2025-07-10T08:50:32.354Z"), 0);
        assert!(validate_upload(&form, 20).is_err());
    }

    #[test]
    fn test_validate_upload_rejects_too_many_files() {
        let form = form(Some("75.8577,22.7196"), Some("2025-07-10T08:50:32.354Z"), 21);
        assert!(validate_upload(&form, 20).is_err());
    }

    #[test]
    fn test_size_kb_rounds() {
        assert_eq!(size_kb(&[0u8; 1024]), 1);
        assert_eq!(size_kb(&[0u8; 1536]), 2);
        assert_eq!(size_kb(&[0u8; 100]), 0);
    }

    #[test]
    fn test_caller_id_requires_header() {
        let headers = HeaderMap::new();
        assert!(caller_id(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "user-42".parse().unwrap());
        assert_eq!(caller_id(&headers).unwrap(), "user-42");
    }
}
