use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Portal error: {0}")]
    Portal(#[from] crate::portal::PortalError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to resolve storage key: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

/// Errors surfaced synchronously by the job manager.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job manager is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<WorkerError> for JobError {
    fn from(_: WorkerError) -> Self {
        JobError::ShuttingDown
    }
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Validation(_) => ErrorKind::Validation,
            JobError::NotFound(_) => ErrorKind::NotFound,
            JobError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            JobError::ShuttingDown | JobError::Store(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job id already exists: {0}")]
    DuplicateId(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Failed to access job snapshot '{path}': {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid job snapshot '{path}': {source}")]
    SnapshotFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Worker pool is no longer accepting jobs")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Error classes recorded on jobs and category results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "AuthenticationError")]
    Authentication,
    #[serde(rename = "NavigationError")]
    Navigation,
    #[serde(rename = "ParseError")]
    Parse,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "UploadError")]
    Upload,
    ExtractionFailed,
    Cancelled,
    Interrupted,
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::Navigation => "NavigationError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Upload => "UploadError",
            ErrorKind::ExtractionFailed => "ExtractionFailed",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable error stored on a job or on one of its categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
