//! Helpers for sanitizing data before it enters logs, spans or storage keys.
//!
//! Portal usernames are student roll numbers, so they are masked wherever
//! they would otherwise be written to a log line.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Keeps the first two characters of a username and masks the rest.
///
/// - `21A91A0501` → `21***`
/// - `ab` → `***`
pub fn redact_username(username: &str) -> String {
    let trimmed = username.trim();
    if trimmed.chars().count() <= 2 {
        return "***".to_string();
    }
    let prefix: String = trimmed.chars().take(2).collect();
    format!("{}***", prefix)
}

/// Normalized key identifying one portal account.
///
/// Usernames differing only in case or surrounding whitespace map to the
/// same key, so they share a serialization slot.
pub fn credential_key(username: &str) -> String {
    let mut hasher = DefaultHasher::new();
    username.trim().to_lowercase().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Makes a value safe to use as a single storage key or path segment.
pub fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    cleaned
}

/// Drops the query string and fragment from a URL.
pub fn redact_url(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].to_string()
}
