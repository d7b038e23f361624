//! Position limit guard.

use quoter_core::{PositionSnapshot, Size};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Classifies the net position as within or over the configured limit.
///
/// Pure threshold, no hysteresis: quoting resumes on the first evaluation
/// after a refreshed position clears the limit. Until the first snapshot
/// arrives the guard reports over-limit.
#[derive(Debug)]
pub struct PositionGuard {
    max_position: Decimal,
    position: Option<Size>,
    last_update_ms: Option<u64>,
}

impl PositionGuard {
    pub fn new(max_position: Decimal) -> Self {
        Self {
            max_position,
            position: None,
            last_update_ms: None,
        }
    }

    /// Apply a position snapshot. Snapshots older than the latest applied one
    /// are ignored. Returns whether the snapshot was applied.
    pub fn update(&mut self, snapshot: PositionSnapshot) -> bool {
        if let Some(last) = self.last_update_ms {
            if snapshot.timestamp_ms < last {
                debug!(
                    snapshot_ms = snapshot.timestamp_ms,
                    last_ms = last,
                    "Stale position snapshot ignored"
                );
                return false;
            }
        }

        let was_within = self.is_within_limit();
        self.position = Some(snapshot.net_position);
        self.last_update_ms = Some(snapshot.timestamp_ms);
        let within = self.is_within_limit();

        if was_within && !within {
            warn!(
                position = %snapshot.net_position,
                max_position = %self.max_position,
                "Position limit exceeded, quoting halted"
            );
        } else if !was_within && within {
            info!(
                position = %snapshot.net_position,
                max_position = %self.max_position,
                "Position within limit, quoting enabled"
            );
        }
        true
    }

    /// `|position| < max_position`; false before the first snapshot.
    pub fn is_within_limit(&self) -> bool {
        self.position
            .map(|p| p.abs().inner() < self.max_position)
            .unwrap_or(false)
    }

    /// Latest applied position.
    pub fn position(&self) -> Option<Size> {
        self.position
    }

    pub fn max_position(&self) -> Decimal {
        self.max_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snap(ms: u64, pos: Decimal) -> PositionSnapshot {
        PositionSnapshot::new(ms, Size::new(pos))
    }

    #[test]
    fn test_unknown_position_is_over_limit() {
        let guard = PositionGuard::new(dec!(0.1));
        assert!(guard.position().is_none());
        assert!(!guard.is_within_limit());
    }

    #[test]
    fn test_within_limit() {
        let mut guard = PositionGuard::new(dec!(0.1));
        assert!(guard.update(snap(1, dec!(0.05))));
        assert!(guard.is_within_limit());
    }

    #[test]
    fn test_over_limit_long_and_short() {
        let mut guard = PositionGuard::new(dec!(0.1));
        guard.update(snap(1, dec!(0.12)));
        assert!(!guard.is_within_limit());

        guard.update(snap(2, dec!(-0.12)));
        assert!(!guard.is_within_limit());
    }

    #[test]
    fn test_limit_is_exclusive() {
        let mut guard = PositionGuard::new(dec!(0.1));
        guard.update(snap(1, dec!(0.1)));
        assert!(!guard.is_within_limit());
    }

    #[test]
    fn test_no_hysteresis() {
        let mut guard = PositionGuard::new(dec!(0.1));
        guard.update(snap(1, dec!(0.2)));
        assert!(!guard.is_within_limit());
        guard.update(snap(2, dec!(0.099)));
        assert!(guard.is_within_limit());
    }

    #[test]
    fn test_stale_snapshot_ignored() {
        let mut guard = PositionGuard::new(dec!(0.1));
        guard.update(snap(10, dec!(0)));
        assert!(!guard.update(snap(5, dec!(0.5))));
        assert_eq!(guard.position(), Some(Size::new(dec!(0))));
        assert!(guard.is_within_limit());
    }
}
