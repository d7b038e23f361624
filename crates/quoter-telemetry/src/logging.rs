//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,quoter=debug";

/// Initialize logging with the default filter.
///
/// `RUST_LOG` overrides the filter. `RUST_ENV=production` selects JSON output,
/// anything else the pretty development format.
pub fn init_logging() -> TelemetryResult<()> {
    init_logging_with(DEFAULT_FILTER)
}

/// Initialize logging with `default_filter` when `RUST_LOG` is unset.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with(default_filter: &str) -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(true))
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

