//! Secret resolution for the storage key and portal passwords.
//!
//! A secret may be given inline, read from a file (container secrets) or read
//! from an environment variable. Sources are tried in that order and the
//! first non-empty one wins.

use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {source_name} is empty")]
    Empty { source_name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first configured source.
///
/// File contents and environment values are trimmed, so trailing newlines
/// written by secret mounts do not end up in the credential.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.display().to_string(),
            source: e,
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SecretError::Empty {
                source_name: format!("file '{}'", expanded.display()),
            });
        }
        return Ok(SecretString::from(trimmed.to_string()));
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(SecretString::from(value.trim().to_string()))
            }
            Ok(_) => Err(SecretError::Empty {
                source_name: format!("environment variable '{}'", name),
            }),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Expands a leading `~` using the platform home directory.
fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return match path.strip_prefix("~/") {
                Some(rest) => home.join(rest),
                None => home,
            };
        }
    }
    PathBuf::from(path)
}
