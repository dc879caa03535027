//! Object storage capability
//!
//! The service treats object storage as an external put/get/delete-by-key
//! collaborator. `HttpObjectStore` talks to any S3-style HTTP store;
//! `MemoryObjectStore` backs tests.

use async_trait::async_trait;
use shelf_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Blob store interface, injected into the coordinator and the worker
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key, returning the public URL
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Fetch the bytes stored under a key
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Build the storage key for an upload: `images/{millis}_{sanitized name}`
pub fn object_key(original_filename: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let sanitized: String = original_filename
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' { '_' } else { c })
        .collect();

    format!("images/{}_{}", millis, sanitized)
}

/// Key under which the processor's annotated rendering of an upload is kept
pub fn processed_object_key(storage_key: &str) -> String {
    format!("processed/{}", storage_key)
}

/// HTTP-backed object store (S3-style REST: PUT/GET/DELETE on
/// `{base}/{bucket}/{key}`)
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(base_url: String, bucket: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let url = self.object_url(key);

        let response = self
            .client
            .put(&url)
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("put {} failed: {}", key, e)))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "put {} returned status {}",
                key,
                response.status()
            )));
        }

        debug!("Stored object: {}", key);
        Ok(url)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let url = self.object_url(key);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("get {} failed: {}", key, e)))?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "get {} returned status {}",
                key,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("get {} body read failed: {}", key, e)))?;

        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.object_url(key);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("delete {} failed: {}", key, e)))?;

        // Absent keys are fine; the cascade may race a prior delete
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Storage(format!(
                "delete {} returned status {}",
                key,
                response.status()
            )));
        }

        info!("Deleted object: {}", key);
        Ok(())
    }
}

/// In-memory object store for tests
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent put fail with a StorageError
    pub async fn set_failing(&self, failing: bool) {
        *self.fail_puts.lock().await = failing;
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        if *self.fail_puts.lock().await {
            return Err(Error::Storage("simulated put failure".to_string()));
        }
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(format!("memory://{}", key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("object {} missing", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_sanitizes_name() {
        let key = object_key("my shelf photo.jpg");
        assert!(key.starts_with("images/"));
        assert!(key.ends_with("_my_shelf_photo.jpg"));
        assert!(!key[7..].contains(' '));
    }

    #[test]
    fn test_object_key_strips_path_separators() {
        let key = object_key("../etc/passwd");
        assert!(!key[7..].contains('/'));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryObjectStore::new();

        let url = store
            .put("images/1_a.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        assert_eq!(url, "memory://images/1_a.jpg");

        let bytes = store.get("images/1_a.jpg").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);

        store.delete("images/1_a.jpg").await.unwrap();
        assert!(store.get("images/1_a.jpg").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_failing_put() {
        let store = MemoryObjectStore::new();
        store.set_failing(true).await;

        let err = store.put("k", vec![1], "image/jpeg").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.is_empty().await);
    }
}
