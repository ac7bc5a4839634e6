use thiserror::Error;

use crate::error::{ErrorDetail, ErrorKind};

/// Failures talking to the portal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    #[error("Login failed: {0}")]
    Authentication(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Unexpected page content: {0}")]
    Parse(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl PortalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::Authentication(_) => ErrorKind::Authentication,
            PortalError::Navigation(_) => ErrorKind::Navigation,
            PortalError::Parse(_) => ErrorKind::Parse,
            PortalError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail::new(self.kind(), self.to_string())
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(e: reqwest::Error) -> Self {
        let url = e
            .url()
            .map(|u| crate::sanitize::redact_url(u.as_str()))
            .unwrap_or_else(|| "<unknown>".to_string());
        if e.is_timeout() {
            PortalError::Timeout(format!("request to {} timed out", url))
        } else {
            PortalError::Navigation(format!("request to {} failed: {}", url, e.without_url()))
        }
    }
}
