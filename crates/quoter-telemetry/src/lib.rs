//! Prometheus metrics and structured logging for the quoter.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus metrics for dispatched actions, failures, gate state and
//!   quote slot status

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, init_logging_with};
pub use metrics::Metrics;
