use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

static RE_JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^job_\d+_[a-z0-9]{4}$").unwrap());

/// Generates `job_<unix-timestamp>_<4 lowercase alphanumerics>`.
pub fn generate_job_id() -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(4)
        .collect();
    format!("job_{}_{}", Utc::now().timestamp(), suffix)
}

pub fn is_valid_job_id(id: &str) -> bool {
    RE_JOB_ID.is_match(id)
}
