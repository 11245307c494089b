//! Logging setup for Murmur Server.
//!
//! `RUST_LOG` takes precedence over the configured filter. The hub's
//! OpenTelemetry instruments report to the global meter provider; none is
//! installed here, so they stay no-ops until an exporter is wired in.

use anyhow::Result;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LogConfig;

/// Build the filter from `RUST_LOG`, falling back to `default_filter`.
fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Initialize the global tracing subscriber.
pub fn init(config: &LogConfig) -> Result<()> {
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(&config.filter))
        .try_init()?;

    tracing::info!(json = config.json, "Telemetry initialized");
    Ok(())
}
