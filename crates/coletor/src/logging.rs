//! Process-wide subscriber setup. `RUST_LOG` wins over the default filter.

use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Call once, early in `main`. A second call returns an error and leaves the
/// first subscriber in place.
pub fn init(format: LogFormat) -> Result<(), SetGlobalDefaultError> {
    let registry = Registry::default().with(filter(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(false).with_thread_names(true)),
        )?,
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        )?,
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::warn!(error = %e, "log records will not reach the subscriber");
    }
    Ok(())
}

