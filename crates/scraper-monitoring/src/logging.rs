//! Opt-in logging initialization for binaries embedding the library.
//!
//! The library itself only emits through `tracing` macros; hosts with their
//! own subscriber just skip this module. [`init_logging`] installs a global
//! subscriber with an env-overridable filter and either human-readable or
//! JSON line output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;
use crate::error::{MonitoringError, Result};

/// Default log filter directive, overridden by `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "scraper_monitoring=info";

/// Install the global tracing subscriber.
///
/// Fails with [`MonitoringError::LoggingInit`] when a subscriber is already
/// installed, so call it once early in the host's main.
pub fn init_logging(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init(),
    };
    result.map_err(|e| MonitoringError::LoggingInit(e.to_string()))
}
