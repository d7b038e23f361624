//! Prometheus metrics for the quoter.
//!
//! Covers:
//! - Actions dispatched and their outcomes
//! - Exchange acknowledgement latency and timeouts
//! - Volatility and position gate state
//! - Quote slot status per side
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a failure means a
//! duplicate metric name, which must abort at startup. Registration only
//! happens during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

use crate::error::TelemetryResult;

/// Slot statuses exported by `quoter_slot_status`.
const SLOT_STATUSES: [&str; 5] = ["empty", "pending", "live", "cancelling", "unknown"];

/// Actions dispatched to the exchange.
/// Labels: side, kind (place/cancel), reason
pub static ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_actions_total",
        "Total place/cancel actions dispatched",
        &["side", "kind", "reason"]
    )
    .unwrap()
});

/// Actions that did not complete.
/// Labels: side, kind, error (busy/dispatch/invalid_transition/ack_timeout)
pub static ACTION_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_action_errors_total",
        "Total actions that failed or were rejected",
        &["side", "kind", "error"]
    )
    .unwrap()
});

/// Exchange acknowledgement latency.
pub static ACK_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "quoter_ack_latency_ms",
        "Exchange acknowledgement latency in milliseconds",
        &["kind"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Ticks received from the feed.
/// Labels: result (accepted/dropped)
pub static TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_ticks_total",
        "Total price ticks received",
        &["result"]
    )
    .unwrap()
});

/// Volatility gate (1 = calm, 0 = volatile).
pub static VOLATILITY_CALM: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("quoter_volatility_calm", "Volatility gate state (1=calm)").unwrap()
});

/// Range of the volatility window in basis points.
pub static VOLATILITY_RANGE_BPS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "quoter_volatility_range_bps",
        "Price range over the volatility window in basis points"
    )
    .unwrap()
});

/// Latest net position.
pub static POSITION: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("quoter_position", "Latest net position in base units").unwrap()
});

/// Position gate (1 = within limit).
pub static POSITION_WITHIN_LIMIT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "quoter_position_within_limit",
        "Position gate state (1=within limit)"
    )
    .unwrap()
});

/// Quote slot status, one-hot per side.
pub static SLOT_STATUS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "quoter_slot_status",
        "Quote slot status per side (1=active)",
        &["side", "status"]
    )
    .unwrap()
});

/// Alerts raised through the notifier.
pub static ALERTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoter_alerts_total",
        "Total operator alerts raised",
        &["priority"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn action_dispatched(side: &str, kind: &str, reason: &str) {
        ACTIONS_TOTAL.with_label_values(&[side, kind, reason]).inc();
    }

    pub fn action_failed(side: &str, kind: &str, error: &str) {
        ACTION_ERRORS_TOTAL
            .with_label_values(&[side, kind, error])
            .inc();
    }

    pub fn ack_latency(kind: &str, latency_ms: f64) {
        ACK_LATENCY_MS.with_label_values(&[kind]).observe(latency_ms);
    }

    pub fn tick_received(accepted: bool) {
        let result = if accepted { "accepted" } else { "dropped" };
        TICKS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Record gate state after an evaluation.
    pub fn gates(calm: bool, range_bps: Option<f64>, within_limit: bool) {
        VOLATILITY_CALM.set(if calm { 1.0 } else { 0.0 });
        if let Some(range) = range_bps {
            VOLATILITY_RANGE_BPS.set(range);
        }
        POSITION_WITHIN_LIMIT.set(if within_limit { 1.0 } else { 0.0 });
    }

    pub fn position(net: f64) {
        POSITION.set(net);
    }

    /// Set the active status for a side; all other statuses go to 0.
    pub fn slot_status(side: &str, status: &str) {
        for s in SLOT_STATUSES {
            SLOT_STATUS.with_label_values(&[side, s]).set(0.0);
        }
        SLOT_STATUS.with_label_values(&[side, status]).set(1.0);
    }

    pub fn alert(priority: &str) {
        ALERTS_TOTAL.with_label_values(&[priority]).inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn encode() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_status_is_one_hot() {
        Metrics::slot_status("bid", "pending");
        Metrics::slot_status("bid", "live");
        assert_eq!(SLOT_STATUS.with_label_values(&["bid", "live"]).get(), 1.0);
        assert_eq!(SLOT_STATUS.with_label_values(&["bid", "pending"]).get(), 0.0);
    }

    #[test]
    fn test_encode_contains_recorded_metrics() {
        Metrics::action_dispatched("ask", "place", "quote");
        Metrics::gates(true, Some(1.5), false);
        let text = Metrics::encode().unwrap();
        assert!(text.contains("quoter_actions_total"));
        assert!(text.contains("quoter_volatility_calm"));
    }
}
