//! Inputs consumed by the quoting engine.
//!
//! `PriceTick` comes from the price feed, `PositionSnapshot` from the
//! position source. Both are immutable once created.

use crate::error::{CoreError, Result};
use crate::{Price, Size};
use serde::{Deserialize, Serialize};

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A reference price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Observation time (Unix milliseconds).
    pub timestamp_ms: u64,
    /// Mid price at that time.
    pub mid_price: Price,
}

impl PriceTick {
    pub fn new(timestamp_ms: u64, mid_price: Price) -> Self {
        Self {
            timestamp_ms,
            mid_price,
        }
    }

    /// Parse one JSON line, e.g. `{"timestamp_ms": 1, "mid_price": "100.5"}`.
    ///
    /// Rejects non-positive prices.
    pub fn from_json_line(line: &str) -> Result<Self> {
        let tick: PriceTick = serde_json::from_str(line)?;
        if !tick.mid_price.is_positive() {
            return Err(CoreError::InvalidPrice(tick.mid_price.to_string()));
        }
        Ok(tick)
    }
}

/// Net position reported by the position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Time the position was observed (Unix milliseconds).
    pub timestamp_ms: u64,
    /// Signed net base-asset position (negative = short).
    pub net_position: Size,
}

impl PositionSnapshot {
    pub fn new(timestamp_ms: u64, net_position: Size) -> Self {
        Self {
            timestamp_ms,
            net_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_from_json_line() {
        let tick = PriceTick::from_json_line(r#"{"timestamp_ms": 1700000000000, "mid_price": "100.25"}"#)
            .unwrap();
        assert_eq!(tick.timestamp_ms, 1_700_000_000_000);
        assert_eq!(tick.mid_price, Price::new(dec!(100.25)));
    }

    #[test]
    fn test_tick_rejects_non_positive_price() {
        let err = PriceTick::from_json_line(r#"{"timestamp_ms": 1, "mid_price": "0"}"#);
        assert!(matches!(err, Err(CoreError::InvalidPrice(_))));
    }

    #[test]
    fn test_tick_rejects_malformed_line() {
        assert!(matches!(
            PriceTick::from_json_line("not json"),
            Err(CoreError::TickParse(_))
        ));
    }

    #[test]
    fn test_now_ms_is_recent() {
        // 2023-11-14 in Unix ms; any sane clock is past this.
        assert!(now_ms() > 1_700_000_000_000);
    }
}
