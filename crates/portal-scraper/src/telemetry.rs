//! Process-wide logging setup.

use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,portal_scraper=debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to bridge log records into tracing: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

static INIT: Once = Once::new();

/// Installs the global subscriber and routes `log` records through it.
///
/// Only the first call has an effect; later calls return `Ok(())`.
pub fn init_logging(format: LogFormat) -> Result<(), TelemetryError> {
    let mut result = Ok(());
    INIT.call_once(|| result = install(format));
    result
}

fn install(format: LogFormat) -> Result<(), TelemetryError> {
    tracing_log::LogTracer::init()?;

    let (text, json) = match format {
        LogFormat::Text => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_current_span(true).with_span_list(false)),
        ),
    };

    let subscriber = Registry::default()
        .with(env_filter())
        .with(text)
        .with(json);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
