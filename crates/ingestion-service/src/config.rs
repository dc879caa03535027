//! Configuration management for the ingestion service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,

    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// External metric processor endpoint
    pub processor_url: String,

    /// Timeout for a single metric processor call, in seconds
    pub processor_timeout_secs: u64,

    /// Object store base URL
    pub object_store_url: String,

    /// Object store bucket name
    pub object_store_bucket: String,

    /// Number of background ingest workers
    pub num_workers: usize,

    /// Maximum images per upload request
    pub max_images_per_upload: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            processor_url: env::var("PROCESSOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090/process".to_string()),

            processor_timeout_secs: env::var("PROCESSOR_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid PROCESSOR_TIMEOUT_SECS")?,

            object_store_url: env::var("OBJECT_STORE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),

            object_store_bucket: env::var("OBJECT_STORE_BUCKET")
                .unwrap_or_else(|_| "shelf-images".to_string()),

            num_workers: env::var("NUM_WORKERS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("Invalid NUM_WORKERS")?,

            max_images_per_upload: env::var("MAX_IMAGES_PER_UPLOAD")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid MAX_IMAGES_PER_UPLOAD")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.num_workers == 0 {
            anyhow::bail!("NUM_WORKERS must be greater than 0");
        }

        if self.processor_timeout_secs == 0 {
            anyhow::bail!("PROCESSOR_TIMEOUT_SECS must be greater than 0");
        }

        if self.max_images_per_upload == 0 {
            anyhow::bail!("MAX_IMAGES_PER_UPLOAD must be greater than 0");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        env::remove_var("API_HOST");
        env::remove_var("API_PORT");
        env::remove_var("REDIS_URL");
        env::remove_var("NUM_WORKERS");
        env::remove_var("PROCESSOR_TIMEOUT_SECS");

        let config = Config::from_env().expect("Failed to load config");

        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.api_host, "0.0.0.0");
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.max_images_per_upload, 20);
    }

    #[test]
    fn test_api_address() {
        env::set_var("API_HOST", "127.0.0.1");
        env::set_var("API_PORT", "9001");

        let config = Config::from_env().unwrap();
        assert_eq!(config.api_address(), "127.0.0.1:9001");

        env::remove_var("API_HOST");
        env::remove_var("API_PORT");
    }
}
