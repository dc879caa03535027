//! External metric processor adapter
//!
//! Sends the stored image to the ML endpoint and turns its multipart
//! response into metric scores. Failures here are non-fatal: the worker
//! converts them into an image status of Failed.

use crate::multipart::parse_processor_response;
use async_trait::async_trait;
use shelf_common::{Error, MetricScores, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Output of a successful processor call
#[derive(Debug, Clone)]
pub struct ProcessedResult {
    /// Annotated image rendered by the processor
    pub image_bytes: Vec<u8>,

    /// OSA / SOS / PGC on the canonical 0-100 scale
    pub metrics: MetricScores,
}

/// Metric processor interface, injected into the worker
#[async_trait]
pub trait MetricProcessor: Send + Sync {
    async fn process(&self, image_bytes: Vec<u8>, filename: &str) -> Result<ProcessedResult>;
}

/// Adapter for the real HTTP metric processor
pub struct HttpMetricProcessor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMetricProcessor {
    pub fn new(endpoint: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Processing(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl MetricProcessor for HttpMetricProcessor {
    async fn process(&self, image_bytes: Vec<u8>, filename: &str) -> Result<ProcessedResult> {
        let part = reqwest::multipart::Part::bytes(image_bytes)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| Error::Processing(format!("invalid upload part: {}", e)))?;

        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Processing(format!("processor call failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Processing(format!(
                "processor returned status {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Processing(format!("processor body read failed: {}", e)))?;

        debug!(
            "Processor responded: {} bytes, content-type {:?}",
            body.len(),
            content_type
        );

        parse_processor_response(&content_type, &body)
    }
}

/// Scripted processor for tests
pub struct MockMetricProcessor {
    outcomes: Mutex<Vec<Result<MetricScores>>>,
    fallback: Option<MetricScores>,
}

impl MockMetricProcessor {
    /// Always succeed with the given scores
    pub fn succeeding(osa: f64, sos: f64, pgc: f64) -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            fallback: Some(MetricScores::new(osa, sos, pgc)),
        }
    }

    /// Always fail as if the network call threw
    pub fn failing() -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            fallback: None,
        }
    }

    /// Queue one specific outcome ahead of the fallback behaviour
    pub async fn push_outcome(&self, outcome: Result<MetricScores>) {
        self.outcomes.lock().await.push(outcome);
    }
}

#[async_trait]
impl MetricProcessor for MockMetricProcessor {
    async fn process(&self, image_bytes: Vec<u8>, _filename: &str) -> Result<ProcessedResult> {
        if let Some(outcome) = self.outcomes.lock().await.pop() {
            return outcome.map(|metrics| ProcessedResult {
                image_bytes,
                metrics,
            });
        }

        match self.fallback {
            Some(metrics) => Ok(ProcessedResult {
                image_bytes,
                metrics,
            }),
            None => Err(Error::Processing(
                "simulated network failure".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_succeeding() {
        let processor = MockMetricProcessor::succeeding(55.2, 21.0, 37.8);
        let result = processor.process(vec![1, 2, 3], "a.jpg").await.unwrap();
        assert_eq!(result.metrics.osa, 55.2);
        assert_eq!(result.image_bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let processor = MockMetricProcessor::failing();
        let err = processor.process(vec![1], "a.jpg").await.unwrap_err();
        assert!(matches!(err, Error::Processing(_)));
    }

    #[tokio::test]
    async fn test_mock_scripted_outcome_first() {
        let processor = MockMetricProcessor::succeeding(1.0, 2.0, 3.0);
        processor
            .push_outcome(Err(Error::Processing("one-off".to_string())))
            .await;

        assert!(processor.process(vec![], "a.jpg").await.is_err());
        assert!(processor.process(vec![], "a.jpg").await.is_ok());
    }
}
