//! Typed request handlers for the HTTP surface.
//!
//! Routing and transport live outside this crate; each function maps one
//! endpoint onto the [`JobManager`]:
//!
//! | Method | Path                  | Handler          |
//! |--------|-----------------------|------------------|
//! | POST   | `/scrape`             | [`submit_scrape`] |
//! | GET    | `/job/{job_id}`       | [`job_status`]   |
//! | POST   | `/job/{job_id}/cancel`| [`cancel_job`]   |
//! | GET    | `/jobs`               | [`list_jobs`]    |
//! | GET    | `/health`             | [`health`]       |

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::error::{ErrorDetail, ErrorKind, JobError};
use crate::job::{CategoryResult, Job, JobManager, JobParameters, JobStatus};

fn default_true() -> bool {
    true
}

/// Body of `POST /scrape`. Every category flag defaults to `true`.
#[derive(Clone, Deserialize)]
pub struct ScrapeRequest {
    pub username: String,
    pub password: String,
    pub academic_year: String,
    #[serde(default = "default_true")]
    pub scrape_attendance: bool,
    #[serde(default = "default_true")]
    pub scrape_mid_marks: bool,
    #[serde(default = "default_true")]
    pub scrape_personal_details: bool,
    #[serde(default = "default_true")]
    pub upload_to_supabase: bool,
}

impl fmt::Debug for ScrapeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("academic_year", &self.academic_year)
            .field("scrape_attendance", &self.scrape_attendance)
            .field("scrape_mid_marks", &self.scrape_mid_marks)
            .field("scrape_personal_details", &self.scrape_personal_details)
            .field("upload_to_supabase", &self.upload_to_supabase)
            .finish()
    }
}

impl ScrapeRequest {
    pub fn into_parameters(self) -> JobParameters {
        JobParameters {
            username: self.username,
            password: SecretString::from(self.password),
            academic_year: self.academic_year,
            scrape_attendance: self.scrape_attendance,
            scrape_mid_marks: self.scrape_mid_marks,
            scrape_personal_details: self.scrape_personal_details,
            upload_to_supabase: self.upload_to_supabase,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub status: JobStatus,
    pub message: String,
    pub job_id: String,
}

/// Job parameters and results echoed by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    pub job_id: String,
    pub username: String,
    pub academic_year: String,
    pub scrape_attendance: bool,
    pub scrape_mid_marks: bool,
    pub scrape_personal_details: bool,
    pub upload_to_supabase: bool,
    pub category_results: BTreeMap<Category, CategoryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Body of `GET /job/{job_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub message: String,
    pub progress: f64,
    pub details: JobDetails,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        let params: &JobParameters = &job.parameters;
        Self {
            status: job.status,
            message: job.message.clone(),
            progress: job.progress,
            details: JobDetails {
                job_id: job.id.clone(),
                username: params.username.clone(),
                academic_year: params.academic_year.clone(),
                scrape_attendance: params.scrape_attendance,
                scrape_mid_marks: params.scrape_mid_marks,
                scrape_personal_details: params.scrape_personal_details,
                upload_to_supabase: params.upload_to_supabase,
                category_results: job.category_results.clone(),
                error: job.error.clone(),
                created_at: job.created_at,
                updated_at: job.updated_at,
                started_at: job.started_at,
                finished_at: job.finished_at,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Error returned by a handler together with its HTTP status code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status_code: u16,
    pub kind: ErrorKind,
    pub detail: String,
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status_code, self.kind, self.detail)
    }
}

impl std::error::Error for ApiError {}

impl From<JobError> for ApiError {
    fn from(error: JobError) -> Self {
        let status_code = match &error {
            JobError::Validation(_) => 422,
            JobError::NotFound(_) => 404,
            JobError::ShuttingDown => 503,
            JobError::Store(_) if error.kind() == ErrorKind::NotFound => 404,
            JobError::Store(_) => 500,
        };
        Self {
            status_code,
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

/// `POST /scrape`
pub fn submit_scrape(
    manager: &JobManager,
    request: ScrapeRequest,
) -> Result<ScrapeResponse, ApiError> {
    let job_id = manager.submit(request.into_parameters())?;
    Ok(ScrapeResponse {
        status: JobStatus::Queued,
        message: "Scraping job started".to_string(),
        job_id,
    })
}

/// `GET /job/{job_id}`
pub fn job_status(manager: &JobManager, job_id: &str) -> Result<JobStatusResponse, ApiError> {
    let job = manager.status(job_id)?;
    Ok(JobStatusResponse::from(job.as_ref()))
}

/// `POST /job/{job_id}/cancel`
pub fn cancel_job(manager: &JobManager, job_id: &str) -> Result<JobStatusResponse, ApiError> {
    let job = manager.cancel(job_id)?;
    Ok(JobStatusResponse::from(job.as_ref()))
}

/// `GET /jobs`, newest first.
pub fn list_jobs(manager: &JobManager) -> Vec<JobStatusResponse> {
    manager
        .list()
        .iter()
        .map(|job| JobStatusResponse::from(job.as_ref()))
        .collect()
}

/// `GET /health`
pub fn health() -> HealthResponse {
    HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    }
}
