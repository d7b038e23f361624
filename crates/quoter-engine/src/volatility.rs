//! Sliding-window volatility gate.
//!
//! Keeps every reference price observed in the last `window_ms` and measures
//! the range of the window in basis points:
//!
//! **Range definition**: `(max - min) / latest × 10000` over the retained ticks.
//!
//! The gate fails safe: until `min_samples` ticks are in the window the
//! market is treated as volatile and no new quotes are placed.

use std::collections::VecDeque;

use quoter_core::{PriceTick, BPS_DENOMINATOR};
use rust_decimal::Decimal;
use tracing::trace;

/// Classifies recent price movement as calm or volatile.
#[derive(Debug)]
pub struct VolatilityGate {
    /// Retained ticks, oldest first.
    window: VecDeque<PriceTick>,
    /// Window length in milliseconds.
    window_ms: u64,
    /// Range (bps) at or above which the market is volatile.
    threshold_bps: Decimal,
    /// Minimum ticks in the window before the market can be calm.
    min_samples: usize,
}

impl VolatilityGate {
    pub fn new(window_ms: u64, threshold_bps: Decimal, min_samples: usize) -> Self {
        Self {
            window: VecDeque::new(),
            window_ms,
            threshold_bps,
            min_samples,
        }
    }

    /// Record a tick and evict everything that fell out of the window.
    ///
    /// Ticks older than the newest retained tick are ignored so the window
    /// stays ordered.
    pub fn observe(&mut self, tick: PriceTick) {
        if let Some(last) = self.window.back() {
            if tick.timestamp_ms < last.timestamp_ms {
                trace!(
                    tick_ms = tick.timestamp_ms,
                    last_ms = last.timestamp_ms,
                    "Out-of-order tick ignored by volatility gate"
                );
                return;
            }
        }
        self.window.push_back(tick);
        self.evict(tick.timestamp_ms);
    }

    fn evict(&mut self, now_ms: u64) {
        while let Some(front) = self.window.front() {
            if now_ms.saturating_sub(front.timestamp_ms) > self.window_ms {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Range of the window in bps, or None with too few samples.
    pub fn range_bps(&self) -> Option<Decimal> {
        if self.window.len() < self.min_samples {
            return None;
        }
        let reference = self.window.back()?.mid_price;
        if reference.is_zero() {
            return None;
        }
        let mut max = reference;
        let mut min = reference;
        for tick in &self.window {
            max = max.max(tick.mid_price);
            min = min.min(tick.mid_price);
        }
        Some((max.inner() - min.inner()) / reference.inner() * BPS_DENOMINATOR)
    }

    /// True when the window holds enough samples and its range is below the threshold.
    pub fn is_calm(&self) -> bool {
        self.range_bps()
            .map(|range| range < self.threshold_bps)
            .unwrap_or(false)
    }

    /// Number of ticks currently retained.
    pub fn sample_count(&self) -> usize {
        self.window.len()
    }
}
