//! Supabase Storage backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use crate::config::StorageConfig;
use crate::error::ConfigError;
use crate::upload::{BackendError, ObjectKey, StorageBackend};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Uploads objects through the Storage REST API with `x-upsert` enabled.
pub struct SupabaseStorage {
    client: Client,
    base_url: String,
    bucket: String,
    key: SecretString,
}

impl SupabaseStorage {
    pub fn new(
        base_url: &str,
        bucket: &str,
        key: SecretString,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Permanent(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            key,
        })
    }

    /// Builds the backend when storage is enabled and has a URL.
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>, ConfigError> {
        let Some(url) = config.url.as_deref().filter(|_| config.is_configured()) else {
            return Ok(None);
        };
        let key = config.resolve_key()?;
        Self::new(url, &config.bucket, key, config.timeout())
            .map(Some)
            .map_err(|e| ConfigError::Validation {
                message: e.to_string(),
            })
    }

    pub fn object_url(&self, key: &ObjectKey) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, key
        )
    }
}

#[async_trait]
impl StorageBackend for SupabaseStorage {
    async fn upsert(&self, key: &ObjectKey, body: &[u8]) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.object_url(key))
            .bearer_auth(self.key.expose_secret())
            .header("apikey", self.key.expose_secret())
            .header("x-upsert", "true")
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(BackendError::from_status(status.as_u16(), &text))
    }
}

fn classify_request_error(e: reqwest::Error) -> BackendError {
    let e = e.without_url();
    if e.is_builder() {
        BackendError::Permanent(e.to_string())
    } else {
        BackendError::Transient(e.to_string())
    }
}
