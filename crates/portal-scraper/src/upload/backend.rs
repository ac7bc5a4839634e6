use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::category::Category;
use crate::sanitize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Worth retrying: network trouble, throttling, server errors.
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("storage rejected the upload: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, truncate(body.trim(), 200))
        };
        if is_transient_status(status) {
            BackendError::Transient(message)
        } else {
            BackendError::Permanent(message)
        }
    }
}

/// Request timeout, too early, throttling and server-side failures.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500..=599)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

/// Storage key for one category of one student and academic year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn for_category(username: &str, academic_year: &str, category: Category) -> Self {
        Self(format!(
            "{}/{}/{}.json",
            sanitize::path_segment(username),
            sanitize::path_segment(academic_year),
            category.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable storage that supports overwriting an object in place.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Writes `body` at `key`, replacing any existing object.
    async fn upsert(&self, key: &ObjectKey, body: &[u8]) -> Result<(), BackendError>;
}
