//! Quoting engine configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Quoting engine configuration.
///
/// Distances are basis points of the reference price. The engine relies on
/// `cancel_distance_bps < order_distance_bps < rebalance_distance_bps`, which
/// [`EngineConfig::validate`] enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Distance from the reference price at which new quotes are placed.
    #[serde(default = "default_order_distance_bps")]
    pub order_distance_bps: Decimal,

    /// A live quote this close to the reference price (or closer) is
    /// cancelled to avoid a fill.
    #[serde(default = "default_cancel_distance_bps")]
    pub cancel_distance_bps: Decimal,

    /// A live quote further than this from the reference price is stale and
    /// cancelled so it can be re-placed closer.
    #[serde(default = "default_rebalance_distance_bps")]
    pub rebalance_distance_bps: Decimal,

    /// Order size in base units.
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,

    /// Quoting halts while `|position| >= max_position`.
    #[serde(default = "default_max_position")]
    pub max_position: Decimal,

    /// Sliding window for the volatility range.
    #[serde(default = "default_volatility_window_sec")]
    pub volatility_window_sec: u64,

    /// Price range (bps) over the window at or above which quoting is suspended.
    #[serde(default = "default_volatility_threshold_bps")]
    pub volatility_threshold_bps: Decimal,

    /// Ticks required in the window before the market can be judged calm.
    #[serde(default = "default_volatility_min_samples")]
    pub volatility_min_samples: usize,

    /// Price tick. Bids are floored and asks ceiled to it.
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,

    /// Lot size. Order sizes are rounded down to it.
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,

    /// Bound on each exchange call before the slot is marked unknown.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Consecutive failures on one side before an alert is raised.
    #[serde(default = "default_alert_after_failures")]
    pub alert_after_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_distance_bps: default_order_distance_bps(),
            cancel_distance_bps: default_cancel_distance_bps(),
            rebalance_distance_bps: default_rebalance_distance_bps(),
            order_size: default_order_size(),
            max_position: default_max_position(),
            volatility_window_sec: default_volatility_window_sec(),
            volatility_threshold_bps: default_volatility_threshold_bps(),
            volatility_min_samples: default_volatility_min_samples(),
            tick_size: default_tick_size(),
            lot_size: default_lot_size(),
            ack_timeout_ms: default_ack_timeout_ms(),
            alert_after_failures: default_alert_after_failures(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot quote safely with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.cancel_distance_bps < Decimal::ZERO {
            return Err(invalid("cancel_distance_bps must not be negative"));
        }
        if self.cancel_distance_bps >= self.order_distance_bps {
            return Err(invalid(format!(
                "cancel_distance_bps ({}) must be below order_distance_bps ({})",
                self.cancel_distance_bps, self.order_distance_bps
            )));
        }
        if self.order_distance_bps >= self.rebalance_distance_bps {
            return Err(invalid(format!(
                "order_distance_bps ({}) must be below rebalance_distance_bps ({})",
                self.order_distance_bps, self.rebalance_distance_bps
            )));
        }
        if self.order_distance_bps >= Decimal::from(10_000) {
            return Err(invalid("order_distance_bps must be below 10000"));
        }
        if self.order_size <= Decimal::ZERO {
            return Err(invalid("order_size must be positive"));
        }
        if self.lot_size < Decimal::ZERO || self.tick_size < Decimal::ZERO {
            return Err(invalid("tick_size and lot_size must not be negative"));
        }
        if !self.lot_size.is_zero() && self.order_size < self.lot_size {
            return Err(invalid("order_size must be at least one lot"));
        }
        if self.max_position <= Decimal::ZERO {
            return Err(invalid("max_position must be positive"));
        }
        if self.volatility_window_sec == 0 {
            return Err(invalid("volatility_window_sec must be positive"));
        }
        if self.volatility_threshold_bps <= Decimal::ZERO {
            return Err(invalid("volatility_threshold_bps must be positive"));
        }
        if self.volatility_min_samples < 2 {
            return Err(invalid("volatility_min_samples must be at least 2"));
        }
        if self.ack_timeout_ms == 0 {
            return Err(invalid("ack_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Volatility window in milliseconds.
    pub fn volatility_window_ms(&self) -> u64 {
        self.volatility_window_sec.saturating_mul(1000)
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(msg.into())
}

fn default_order_distance_bps() -> Decimal {
    Decimal::new(10, 0) // 10 bps
}
fn default_cancel_distance_bps() -> Decimal {
    Decimal::new(5, 0) // 5 bps
}
fn default_rebalance_distance_bps() -> Decimal {
    Decimal::new(20, 0) // 20 bps
}
fn default_order_size() -> Decimal {
    Decimal::new(1, 3) // 0.001
}
fn default_max_position() -> Decimal {
    Decimal::new(1, 1) // 0.1
}
fn default_volatility_window_sec() -> u64 {
    5
}
fn default_volatility_threshold_bps() -> Decimal {
    Decimal::new(5, 0) // 5 bps
}
fn default_volatility_min_samples() -> usize {
    2
}
fn default_tick_size() -> Decimal {
    Decimal::new(1, 2) // 0.01
}
fn default_lot_size() -> Decimal {
    Decimal::new(1, 3) // 0.001
}
fn default_ack_timeout_ms() -> u64 {
    5_000
}
fn default_alert_after_failures() -> u32 {
    3
}
