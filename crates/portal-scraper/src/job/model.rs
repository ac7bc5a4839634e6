//! Job records tracked by the store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::error::ErrorDetail;

pub const MSG_QUEUED: &str = "Job queued for processing";
pub const MSG_RUNNING: &str = "Scraping in progress";
pub const MSG_UPLOADING: &str = "Uploading data to Supabase";
pub const MSG_ALL_SUCCEEDED: &str = "All scraping tasks completed successfully";
pub const MSG_ALL_FAILED: &str = "All scraping tasks failed";

/// Lifecycle state of a job. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a record in this state may be rewritten with `next`.
    ///
    /// Staying in the same state is always allowed; terminal states never change.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters captured when the job was submitted.
///
/// Shared behind an `Arc` and never mutated. The password is skipped by
/// serde, so neither status responses nor snapshots ever contain it.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobParameters {
    pub username: String,
    #[serde(skip, default = "empty_secret")]
    pub password: SecretString,
    pub academic_year: String,
    pub scrape_attendance: bool,
    pub scrape_mid_marks: bool,
    pub scrape_personal_details: bool,
    pub upload_to_supabase: bool,
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

impl JobParameters {
    /// Selected categories in scrape order.
    pub fn selected_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|category| self.is_selected(*category))
            .collect()
    }

    pub fn is_selected(&self, category: Category) -> bool {
        match category {
            Category::Attendance => self.scrape_attendance,
            Category::MidMarks => self.scrape_mid_marks,
            Category::PersonalDetails => self.scrape_personal_details,
        }
    }
}

/// Upload progress of one category, tracked apart from extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    NotRequested,
    /// Extraction failed, so there is nothing to upload.
    Skipped,
    Pending,
    Uploaded {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        error: ErrorDetail,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub success: bool,
    pub record_count: usize,
    pub error: Option<ErrorDetail>,
    pub upload: UploadState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
}

impl CategoryResult {
    pub fn succeeded(record_count: usize) -> Self {
        Self {
            success: true,
            record_count,
            error: None,
            upload: UploadState::NotRequested,
            artifact_path: None,
        }
    }

    pub fn failed(error: ErrorDetail) -> Self {
        Self {
            success: false,
            record_count: 0,
            error: Some(error),
            upload: UploadState::Skipped,
            artifact_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub parameters: Arc<JobParameters>,
    #[serde(default)]
    pub category_results: BTreeMap<Category, CategoryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: impl Into<String>, parameters: Arc<JobParameters>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            message: MSG_QUEUED.to_string(),
            parameters,
            category_results: BTreeMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// How long the job has been running, if it has started.
    pub fn runtime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or(now);
        Some(end - started)
    }

    /// Marks the job failed with an aborting cause.
    pub fn fail(&mut self, error: ErrorDetail, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.message = message.into();
        self.error = Some(error);
    }
}

/// Final message summarizing how many categories were extracted.
pub fn summary_message(succeeded: usize, total: usize) -> String {
    if succeeded == total {
        MSG_ALL_SUCCEEDED.to_string()
    } else if succeeded == 0 {
        MSG_ALL_FAILED.to_string()
    } else {
        format!(
            "{} of {} scraping tasks completed successfully",
            succeeded, total
        )
    }
}
