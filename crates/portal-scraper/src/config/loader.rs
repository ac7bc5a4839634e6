use std::path::Path;

use reqwest::Url;

use crate::config::schema::ServiceConfig;
use crate::error::ConfigError;

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_BUCKET: &str = "SUPABASE_BUCKET";
pub const ENV_WORKERS: &str = "PORTAL_SCRAPER_WORKERS";
pub const ENV_PORTAL_URL: &str = "PORTAL_BASE_URL";

/// Loads a config file, applies environment overrides and validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config: ServiceConfig = serde_json::from_str(&content)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parses and validates a config document without consulting the environment.
pub fn load_config_from_str(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Loads `path` when given, otherwise starts from defaults. Environment
/// overrides apply in both cases.
pub fn resolve_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = ServiceConfig::default();
            apply_env_overrides(&mut config)?;
            validate_config(&config)?;
            Ok(config)
        }
    }
}

pub fn apply_env_overrides(config: &mut ServiceConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |name| std::env::var(name).ok())
}

fn apply_overrides_from<F>(config: &mut ServiceConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = value(ENV_SUPABASE_URL) {
        config.storage.url = Some(url.trim().to_string());
    }
    if let Some(bucket) = value(ENV_SUPABASE_BUCKET) {
        config.storage.bucket = bucket.trim().to_string();
    }
    if let Some(base_url) = value(ENV_PORTAL_URL) {
        config.portal.base_url = base_url.trim().to_string();
    }
    if let Some(workers) = value(ENV_WORKERS) {
        config.workers = workers
            .trim()
            .parse()
            .map_err(|e| ConfigError::Validation {
                message: format!("{} must be a positive integer: {}", ENV_WORKERS, e),
            })?;
    }

    Ok(())
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    if config.workers == 0 {
        return Err(invalid("workers must be greater than 0"));
    }

    Url::parse(&config.portal.base_url).map_err(|e| {
        invalid(format!(
            "portal.base_url '{}' is not a valid URL: {}",
            config.portal.base_url, e
        ))
    })?;

    for (name, path) in [
        ("portal.login_path", &config.portal.login_path),
        ("portal.attendance_path", &config.portal.attendance_path),
        ("portal.mid_marks_path", &config.portal.mid_marks_path),
        (
            "portal.personal_details_path",
            &config.portal.personal_details_path,
        ),
    ] {
        if path.trim().is_empty() {
            return Err(invalid(format!("{} must not be empty", name)));
        }
    }

    for (name, secs) in [
        ("portal.request_timeout_secs", config.portal.request_timeout_secs),
        ("portal.login_timeout_secs", config.portal.login_timeout_secs),
        (
            "portal.category_timeout_secs",
            config.portal.category_timeout_secs,
        ),
        ("storage.timeout_secs", config.storage.timeout_secs),
        ("jobs.max_runtime_secs", config.jobs.max_runtime_secs),
        ("jobs.monitor_interval_secs", config.jobs.monitor_interval_secs),
    ] {
        if secs == 0 {
            return Err(invalid(format!("{} must be greater than 0", name)));
        }
    }

    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if config.retry.multiplier < 1.0 {
        return Err(invalid("retry.multiplier must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        return Err(invalid("retry.jitter must be between 0 and 1"));
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return Err(invalid("retry.max_delay_ms must not be below retry.base_delay_ms"));
    }

    if let Some(url) = config.storage.url.as_deref() {
        Url::parse(url)
            .map_err(|e| invalid(format!("storage.url '{}' is not a valid URL: {}", url, e)))?;
    }
    if config.storage.bucket.trim().is_empty() {
        return Err(invalid("storage.bucket must not be empty"));
    }
    if config.jobs.event_capacity == 0 {
        return Err(invalid("jobs.event_capacity must be greater than 0"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
