use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secrets;

pub const DEFAULT_PORTAL_URL: &str = "http://103.203.175.90:94";
pub const DEFAULT_BUCKET: &str = "demo-usingfastapi";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Number of jobs allowed to hold a portal session at the same time.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            portal: PortalConfig::default(),
            storage: StorageConfig::default(),
            retry: RetryConfig::default(),
            artifacts: ArtifactConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_attendance_path")]
    pub attendance_path: String,
    #[serde(default = "default_mid_marks_path")]
    pub mid_marks_path: String,
    #[serde(default = "default_personal_details_path")]
    pub personal_details_path: String,
    #[serde(default)]
    pub logout_path: Option<String>,
    /// Query parameter carrying the academic year on category pages.
    #[serde(default = "default_year_param")]
    pub academic_year_param: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
    #[serde(default = "default_category_timeout")]
    pub category_timeout_secs: u64,
}

impl PortalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn category_timeout(&self) -> Duration {
        Duration::from_secs(self.category_timeout_secs)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            attendance_path: default_attendance_path(),
            mid_marks_path: default_mid_marks_path(),
            personal_details_path: default_personal_details_path(),
            logout_path: None,
            academic_year_param: default_year_param(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            login_timeout_secs: default_login_timeout(),
            category_timeout_secs: default_category_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_PORTAL_URL.to_string()
}

fn default_login_path() -> String {
    "/attendance/attendanceLogin.php".to_string()
}

fn default_attendance_path() -> String {
    "/attendance/attendanceTillADate.php".to_string()
}

fn default_mid_marks_path() -> String {
    "/attendance/midMarks.php".to_string()
}

fn default_personal_details_path() -> String {
    "/attendance/studentDetails.php".to_string()
}

fn default_year_param() -> String {
    "academicYear".to_string()
}

fn default_user_agent() -> String {
    concat!("portal-scraper/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_login_timeout() -> u64 {
    60
}

fn default_category_timeout() -> u64 {
    120
}

/// Durable storage for scraped records.
///
/// The service key is never written back out: `key` is skipped when the
/// config is serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default, skip_serializing)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default = "default_key_env_var")]
    pub key_env_var: Option<String>,
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

impl StorageConfig {
    /// Resolves the service key from the configured sources.
    pub fn resolve_key(&self) -> Result<SecretString, ConfigError> {
        Ok(secrets::resolve_secret(
            self.key.as_deref(),
            self.key_file.as_deref(),
            self.key_env_var.as_deref(),
        )?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// True when uploads can be attempted at all.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            bucket: default_bucket(),
            key: None,
            key_file: None,
            key_env_var: default_key_env_var(),
            timeout_secs: default_upload_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_key_env_var() -> Option<String> {
    Some("SUPABASE_KEY".to_string())
}

fn default_upload_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of each delay that is randomized, in [0, 1].
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_directory")]
    pub directory: PathBuf,
    /// Keep the local copy even after a successful upload.
    #[serde(default)]
    pub retain_uploaded: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            directory: default_artifact_directory(),
            retain_uploaded: false,
        }
    }
}

fn default_artifact_directory() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".portal-scraper").join("artifacts"))
        .unwrap_or_else(|| PathBuf::from("artifacts"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Directory for job record snapshots. Jobs live in memory only when unset.
    #[serde(default)]
    pub snapshot_directory: Option<PathBuf>,
    #[serde(default = "default_max_runtime")]
    pub max_runtime_secs: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl JobsConfig {
    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            snapshot_directory: None,
            max_runtime_secs: default_max_runtime(),
            monitor_interval_secs: default_monitor_interval(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_max_runtime() -> u64 {
    15 * 60
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_event_capacity() -> usize {
    256
}
