//! Tick admission.

use quoter_core::PriceTick;
use tracing::debug;

/// Drops ticks that would move the reference price backwards in time.
///
/// A tick with the same timestamp as the latest accepted one is accepted and
/// replaces it as the reference.
#[derive(Debug, Default)]
pub struct TickFilter {
    last_ms: Option<u64>,
    dropped: u64,
}

impl TickFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tick` would be accepted. Does not advance the filter.
    pub fn admits(&self, tick: &PriceTick) -> bool {
        tick.mid_price.is_positive() && self.last_ms.map_or(true, |last| tick.timestamp_ms >= last)
    }

    /// Whether the tick should be processed. Accepted ticks advance the filter.
    pub fn accept(&mut self, tick: &PriceTick) -> bool {
        if !self.admits(tick) {
            self.dropped += 1;
            debug!(
                tick_ms = tick.timestamp_ms,
                last_ms = ?self.last_ms,
                price = %tick.mid_price,
                "Tick dropped"
            );
            return false;
        }
        self.last_ms = Some(tick.timestamp_ms);
        true
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::Price;
    use rust_decimal_macros::dec;

    #[test]
    fn test_in_order_and_equal_timestamps_accepted() {
        let mut filter = TickFilter::new();
        assert!(filter.accept(&PriceTick::new(1, Price::new(dec!(100)))));
        assert!(filter.accept(&PriceTick::new(1, Price::new(dec!(101)))));
        assert!(filter.accept(&PriceTick::new(2, Price::new(dec!(101)))));
        assert_eq!(filter.dropped(), 0);
    }

    #[test]
    fn test_older_tick_dropped() {
        let mut filter = TickFilter::new();
        filter.accept(&PriceTick::new(10, Price::new(dec!(100))));
        assert!(!filter.admits(&PriceTick::new(9, Price::new(dec!(100)))));
        assert!(!filter.accept(&PriceTick::new(9, Price::new(dec!(100)))));
        assert_eq!(filter.dropped(), 1);
        // The rejected tick did not move the filter
        assert!(filter.accept(&PriceTick::new(10, Price::new(dec!(100)))));
    }

    #[test]
    fn test_non_positive_price_dropped() {
        let mut filter = TickFilter::new();
        assert!(!filter.accept(&PriceTick::new(5, Price::ZERO)));
        // A dropped zero-price tick does not set the reference time
        assert!(filter.accept(&PriceTick::new(1, Price::new(dec!(100)))));
    }
}
