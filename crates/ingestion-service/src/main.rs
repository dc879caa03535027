//! Ingestion Service
//!
//! REST API for accepting shelf-image uploads + background workers that
//! process them through the external metric processor

use anyhow::{Context, Result};
use ingestion_service::{
    create_router, AppState, Config, HttpMetricProcessor, HttpObjectStore, MetricProcessor,
    ObjectStore, ShelfAggregator, Storage, Worker,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingestion_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Starting Ingestion Service");
    info!("Redis URL: {}", config.redis_url);
    info!("Processor URL: {}", config.processor_url);
    info!("Object store: {}/{}", config.object_store_url, config.object_store_bucket);

    // Collaborators, injected everywhere they are consumed
    let object_store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(
        config.object_store_url.clone(),
        config.object_store_bucket.clone(),
    ));

    let processor: Arc<dyn MetricProcessor> = Arc::new(
        HttpMetricProcessor::new(config.processor_url.clone(), config.processor_timeout_secs)
            .context("Failed to build processor client")?,
    );

    // Storage for the API
    let api_storage = Storage::new(&config.redis_url)
        .await
        .context("Failed to initialize API storage")?;

    // Re-queue jobs stranded by a previous crash, then start the workers
    let mut recovery_worker = Worker::new(
        api_storage.clone(),
        object_store.clone(),
        processor.clone(),
    );
    let recovered = recovery_worker
        .recover_incomplete()
        .await
        .context("Crash-recovery scan failed")?;
    if recovered > 0 {
        info!("Re-queued {} jobs from a previous run", recovered);
    }

    for worker_id in 0..config.num_workers {
        let worker_storage = Storage::new(&config.redis_url)
            .await
            .context("Failed to initialize worker storage")?;
        let mut worker = Worker::new(worker_storage, object_store.clone(), processor.clone());

        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                tracing::error!("Worker {} error: {}", worker_id, e);
            }
        });
    }
    info!("Started {} ingest workers", config.num_workers);

    // Application state
    let state = AppState {
        storage: Mutex::new(api_storage.clone()),
        aggregator: Mutex::new(ShelfAggregator::new(api_storage, object_store.clone())),
        object_store,
        max_images_per_upload: config.max_images_per_upload,
    };

    let app = create_router(state);

    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Ingestion Service API running on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
