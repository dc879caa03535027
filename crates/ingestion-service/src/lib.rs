//! Shelf-image ingestion service
//!
//! REST API for uploading geotagged shelf images plus a background worker
//! pool that runs each image through the external metric processor and
//! aggregates the results into shelves. Uploads are acknowledged with 202
//! before processing; callers observe progress via the status endpoint.

pub mod config;
pub mod handlers;
pub mod models;
pub mod multipart;
pub mod object_store;
pub mod processor;
pub mod shelf;
pub mod storage;
pub mod worker;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use handlers::AppState;
pub use models::{ImageDoc, ShelfDoc};
pub use object_store::{HttpObjectStore, MemoryObjectStore, ObjectStore};
pub use processor::{HttpMetricProcessor, MetricProcessor, MockMetricProcessor};
pub use shelf::ShelfAggregator;
pub use storage::Storage;
pub use worker::Worker;

/// Uploads are capped at 10 MB per file, 20 files per request
const MAX_BODY_BYTES: usize = 200 * 1024 * 1024;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/image/upload", post(handlers::upload_handler))
        .route(
            "/api/image/sync-offline-upload",
            post(handlers::sync_offline_upload_handler),
        )
        .route(
            "/api/image/status/{image_id}",
            get(handlers::image_status_handler),
        )
        .route("/api/shelf", get(handlers::get_shelves_handler))
        .route(
            "/api/shelf/{shelf_id}",
            delete(handlers::delete_shelf_handler),
        )
        .route("/api/admin/shelves", get(handlers::admin_shelves_handler))
        .route("/api/admin/stats", get(handlers::admin_stats_handler))
        .with_state(shared_state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
