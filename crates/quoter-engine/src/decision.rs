//! Quote decision engine.
//!
//! Turns each reference price update into at most one action per side.
//! Each side is decided independently from its slot, the volatility gate and
//! the position guard, in strict priority order:
//!
//! | # | Condition                               | Action              |
//! |---|-----------------------------------------|---------------------|
//! | 1 | over-limit, Live                        | Cancel              |
//! | 2 | over-limit, Pending                     | Cancel (deferred)   |
//! | 3 | Pending / Cancelling / Unknown          | none                |
//! | 4 | over-limit, Empty                       | none                |
//! | 5 | volatile, Empty                         | none                |
//! | 6 | volatile, Live                          | Cancel              |
//! | 7 | Empty                                   | Place               |
//! | 8 | Live, crossed the reference             | Cancel              |
//! | 9 | Live, distance <= cancel distance       | Cancel              |
//! | 10| Live, distance > rebalance distance     | Cancel              |
//! | 11| otherwise                               | none                |
//!
//! A cancelled side is only re-placed once its slot is Empty again, so the
//! engine never emits a cancel and a place for the same side in one cycle.

use std::sync::Arc;

use quoter_core::{PositionSnapshot, Price, PriceTick, QuoteSide, Size};
use quoter_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, trace, warn};

use crate::action::{ActionReason, ActionRequest};
use crate::config::EngineConfig;
use crate::feed::TickFilter;
use crate::position::PositionGuard;
use crate::quote_state::{QuoteSlot, QuoteState, SlotStatus};
use crate::volatility::VolatilityGate;

/// Decides place/cancel actions for both sides of one instrument.
#[derive(Debug)]
pub struct QuoteDecisionEngine {
    config: EngineConfig,
    volatility: VolatilityGate,
    position: PositionGuard,
    state: Arc<QuoteState>,
    tick_filter: TickFilter,
    last_reference: Option<Price>,
    /// Last observed gate states, for change-only logging.
    last_calm: Option<bool>,
    last_within: Option<bool>,
}

impl QuoteDecisionEngine {
    pub fn new(config: EngineConfig, state: Arc<QuoteState>) -> Self {
        let volatility = VolatilityGate::new(
            config.volatility_window_ms(),
            config.volatility_threshold_bps,
            config.volatility_min_samples,
        );
        let position = PositionGuard::new(config.max_position);
        Self {
            config,
            volatility,
            position,
            state,
            tick_filter: TickFilter::new(),
            last_reference: None,
            last_calm: None,
            last_within: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<QuoteState> {
        &self.state
    }

    /// Latest accepted reference price.
    pub fn last_reference(&self) -> Option<Price> {
        self.last_reference
    }

    pub fn is_calm(&self) -> bool {
        self.volatility.is_calm()
    }

    pub fn is_within_limit(&self) -> bool {
        self.position.is_within_limit()
    }

    pub fn volatility(&self) -> &VolatilityGate {
        &self.volatility
    }

    pub fn position(&self) -> &PositionGuard {
        &self.position
    }

    /// Whether [`Self::on_tick`] would accept `tick`.
    pub fn admits(&self, tick: &PriceTick) -> bool {
        self.tick_filter.admits(tick)
    }

    /// Ticks dropped as out-of-order or non-positive.
    pub fn dropped_ticks(&self) -> u64 {
        self.tick_filter.dropped()
    }

    /// Feed a price tick and evaluate against it.
    ///
    /// Ticks older than the latest accepted one produce no actions.
    pub fn on_tick(&mut self, tick: PriceTick) -> Vec<ActionRequest> {
        let accepted = self.tick_filter.accept(&tick);
        Metrics::tick_received(accepted);
        if !accepted {
            return Vec::new();
        }
        self.volatility.observe(tick);
        self.last_reference = Some(tick.mid_price);
        self.evaluate(tick.mid_price)
    }

    /// Apply a position snapshot. Takes effect on the next evaluation.
    pub fn on_position(&mut self, snapshot: PositionSnapshot) -> bool {
        let applied = self.position.update(snapshot);
        if applied {
            if let Some(net) = snapshot.net_position.inner().to_f64() {
                Metrics::position(net);
            }
        }
        applied
    }

    /// Re-evaluate against the last reference price (periodic fallback).
    pub fn evaluate_last(&mut self) -> Vec<ActionRequest> {
        match self.last_reference {
            Some(reference) => self.evaluate(reference),
            None => Vec::new(),
        }
    }

    /// Evaluate both sides against `reference`.
    pub fn evaluate(&mut self, reference: Price) -> Vec<ActionRequest> {
        let calm = self.volatility.is_calm();
        let within = self.position.is_within_limit();
        self.log_gate_changes(calm, within);
        Metrics::gates(
            calm,
            self.volatility.range_bps().and_then(|r| r.to_f64()),
            within,
        );

        let snapshot = self.state.snapshot();
        let actions: Vec<ActionRequest> = QuoteSide::ALL
            .iter()
            .filter_map(|side| decide(snapshot.get(*side), reference, calm, within, &self.config))
            .collect();

        if !actions.is_empty() {
            debug!(
                reference = %reference,
                calm,
                within_limit = within,
                actions = actions.len(),
                "Evaluation produced actions"
            );
        }
        actions
    }

    fn log_gate_changes(&mut self, calm: bool, within: bool) {
        if self.last_calm != Some(calm) {
            if calm {
                info!(
                    range_bps = ?self.volatility.range_bps(),
                    "Volatility gate open, quoting allowed"
                );
            } else {
                info!(
                    range_bps = ?self.volatility.range_bps(),
                    samples = self.volatility.sample_count(),
                    "Volatility gate closed, quoting suspended"
                );
            }
            self.last_calm = Some(calm);
        }
        if self.last_within != Some(within) {
            debug!(
                position = ?self.position.position(),
                within_limit = within,
                "Position gate changed"
            );
            self.last_within = Some(within);
        }
    }
}

/// Decide the action for one side. Pure: reads nothing but its arguments.
pub fn decide(
    slot: &QuoteSlot,
    reference: Price,
    calm: bool,
    within_limit: bool,
    config: &EngineConfig,
) -> Option<ActionRequest> {
    let side = slot.side;
    let cancel = |reason| {
        Some(ActionRequest::cancel(
            side,
            slot.order_id.clone(),
            slot.price,
            slot.size,
            reason,
        ))
    };

    match slot.status {
        SlotStatus::Live if !within_limit => cancel(ActionReason::OverLimit),
        SlotStatus::Pending if !within_limit && !slot.cancel_on_ack => {
            cancel(ActionReason::OverLimit)
        }
        SlotStatus::Pending | SlotStatus::Cancelling | SlotStatus::Unknown => {
            trace!(side = %side, status = %slot.status, "Side busy, no action");
            None
        }
        SlotStatus::Empty if !within_limit => None,
        SlotStatus::Empty if !calm => None,
        SlotStatus::Live if !calm => cancel(ActionReason::Volatile),
        SlotStatus::Empty => place(side, reference, config),
        SlotStatus::Live => {
            if is_crossed(side, slot.price, reference) {
                return cancel(ActionReason::Crossed);
            }
            let distance = slot.price.distance_bps(reference)?;
            if distance <= config.cancel_distance_bps {
                cancel(ActionReason::TooClose)
            } else if distance > config.rebalance_distance_bps {
                cancel(ActionReason::Stale)
            } else {
                None
            }
        }
    }
}

/// A bid at or above the reference, or an ask at or below it.
fn is_crossed(side: QuoteSide, price: Price, reference: Price) -> bool {
    match side {
        QuoteSide::Bid => price >= reference,
        QuoteSide::Ask => price <= reference,
    }
}

/// Target quote price for `side`: `order_distance_bps` away from the
/// reference, bid floored and ask ceiled to the tick.
pub fn target_price(side: QuoteSide, reference: Price, config: &EngineConfig) -> Price {
    let tick = Price::new(config.tick_size);
    match side {
        QuoteSide::Bid => reference
            .offset_bps(-config.order_distance_bps)
            .floor_to_tick(tick),
        QuoteSide::Ask => reference
            .offset_bps(config.order_distance_bps)
            .ceil_to_tick(tick),
    }
}

fn place(side: QuoteSide, reference: Price, config: &EngineConfig) -> Option<ActionRequest> {
    let price = target_price(side, reference, config);
    let size = Size::new(config.order_size).round_to_lot(Size::new(config.lot_size));
    if !price.is_positive() || !size.is_positive() {
        debug!(side = %side, price = %price, size = %size, "Degenerate quote skipped");
        return None;
    }
    // A fresh quote must survive its own next evaluation
    let distance = price.distance_bps(reference)?;
    if distance <= config.cancel_distance_bps || distance > config.rebalance_distance_bps {
        warn!(
            side = %side,
            reference = %reference,
            price = %price,
            distance_bps = %distance,
            tick_size = %config.tick_size,
            "Tick-aligned quote falls outside the hold band, not placed"
        );
        return None;
    }
    Some(ActionRequest::place(side, price, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use quoter_core::OrderId;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn px(v: Decimal) -> Price {
        Price::new(v)
    }

    /// Engine with a calm window at `reference` and a flat position.
    fn calm_engine(config: EngineConfig, reference: Decimal) -> QuoteDecisionEngine {
        let mut engine = QuoteDecisionEngine::new(config, Arc::new(QuoteState::new()));
        engine.on_position(PositionSnapshot::new(1, Size::ZERO));
        engine.volatility.observe(PriceTick::new(1_000, px(reference)));
        engine.volatility.observe(PriceTick::new(1_100, px(reference)));
        engine.tick_filter.accept(&PriceTick::new(1_100, px(reference)));
        engine
    }

    fn make_live(engine: &QuoteDecisionEngine, side: QuoteSide, price: Decimal) -> OrderId {
        let id = OrderId::generate(side);
        engine
            .state()
            .adopt(side, id.clone(), px(price), Size::new(dec!(0.001)))
            .unwrap();
        id
    }

    fn slot(side: QuoteSide, status: SlotStatus, price: Decimal) -> QuoteSlot {
        let mut slot = QuoteSlot::empty(side);
        slot.status = status;
        if status != SlotStatus::Empty {
            slot.order_id = Some(OrderId::generate(side));
            slot.price = px(price);
            slot.size = Size::new(dec!(0.001));
        }
        slot
    }

    #[test]
    fn test_scenario_a_one_bps() {
        let cfg = EngineConfig {
            order_distance_bps: dec!(1),
            cancel_distance_bps: dec!(0.5),
            ..config()
        };
        let mut engine = calm_engine(cfg, dec!(100));
        let actions = engine.on_tick(PriceTick::new(1_200, px(dec!(100))));

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], ActionRequest::place(QuoteSide::Bid, px(dec!(99.99)), Size::new(dec!(0.001))));
        assert_eq!(actions[1], ActionRequest::place(QuoteSide::Ask, px(dec!(100.01)), Size::new(dec!(0.001))));
    }

    #[test]
    fn test_scenario_a_default_distance() {
        let mut engine = calm_engine(config(), dec!(100));
        let actions = engine.on_tick(PriceTick::new(1_200, px(dec!(100))));

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].target_price, px(dec!(99.90)));
        assert_eq!(actions[1].target_price, px(dec!(100.10)));
        assert!(actions.iter().all(|a| a.reason == ActionReason::Quote));
    }

    #[test]
    fn test_scenario_b_too_close() {
        let mut engine = calm_engine(config(), dec!(100));
        let id = make_live(&engine, QuoteSide::Bid, dec!(99.99));
        make_live(&engine, QuoteSide::Ask, dec!(100.10));

        let actions = engine.on_tick(PriceTick::new(1_200, px(dec!(99.995))));
        let bid: Vec<_> = actions.iter().filter(|a| a.side == QuoteSide::Bid).collect();
        assert_eq!(bid.len(), 1);
        assert_eq!(bid[0].kind, ActionKind::Cancel);
        assert_eq!(bid[0].reason, ActionReason::TooClose);
        assert_eq!(bid[0].order_id, Some(id));

        // Cancel in flight: no replacement
        engine.state().mark_cancelling(QuoteSide::Bid).unwrap();
        let actions = engine.evaluate_last();
        assert!(actions.iter().all(|a| a.side != QuoteSide::Bid));

        // Acknowledged: the side quotes again
        engine.state().clear(QuoteSide::Bid).unwrap();
        let actions = engine.evaluate_last();
        assert!(actions
            .iter()
            .any(|a| a.side == QuoteSide::Bid && a.is_place()));
    }

    #[test]
    fn test_scenario_c_stale() {
        let mut engine = calm_engine(config(), dec!(100.25));
        make_live(&engine, QuoteSide::Bid, dec!(99.99));

        let actions = engine.evaluate(px(dec!(100.25)));
        let bid = actions
            .iter()
            .find(|a| a.side == QuoteSide::Bid)
            .expect("bid action");
        assert!(bid.is_cancel());
        assert_eq!(bid.reason, ActionReason::Stale);
    }

    #[test]
    fn test_scenario_d_over_limit() {
        let mut engine = calm_engine(config(), dec!(100));
        make_live(&engine, QuoteSide::Bid, dec!(99.90));
        make_live(&engine, QuoteSide::Ask, dec!(100.10));
        engine.on_position(PositionSnapshot::new(2, Size::new(dec!(0.12))));

        let actions = engine.evaluate(px(dec!(100)));
        assert_eq!(actions.len(), 2);
        assert!(actions
            .iter()
            .all(|a| a.is_cancel() && a.reason == ActionReason::OverLimit));

        engine.state().reset();
        for _ in 0..3 {
            assert!(engine.evaluate(px(dec!(100))).is_empty());
        }
    }

    #[test]
    fn test_idempotent_when_correctly_placed() {
        let mut engine = calm_engine(config(), dec!(100));
        make_live(&engine, QuoteSide::Bid, dec!(99.90));
        make_live(&engine, QuoteSide::Ask, dec!(100.10));

        assert!(engine.evaluate(px(dec!(100))).is_empty());
        assert!(engine.evaluate(px(dec!(100))).is_empty());
    }

    #[test]
    fn test_volatile_cancels_live_and_withholds_places() {
        let mut engine = calm_engine(config(), dec!(100));
        make_live(&engine, QuoteSide::Bid, dec!(99.90));

        // 100 -> 100.1 is a 10 bps range
        let actions = engine.on_tick(PriceTick::new(1_200, px(dec!(100.1))));
        assert!(!engine.is_calm());
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].side, QuoteSide::Bid);
        assert_eq!(actions[0].reason, ActionReason::Volatile);
    }

    #[test]
    fn test_no_quotes_before_position_known() {
        let mut engine = QuoteDecisionEngine::new(config(), Arc::new(QuoteState::new()));
        engine.on_tick(PriceTick::new(1_000, px(dec!(100))));
        let actions = engine.on_tick(PriceTick::new(1_100, px(dec!(100))));
        assert!(engine.is_calm());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_out_of_order_tick_is_ignored() {
        let mut engine = calm_engine(config(), dec!(100));
        engine.on_tick(PriceTick::new(2_000, px(dec!(100))));
        assert!(engine.on_tick(PriceTick::new(1_500, px(dec!(90)))).is_empty());
        assert_eq!(engine.last_reference(), Some(px(dec!(100))));
    }

    #[test]
    fn test_evaluate_last_without_reference() {
        let mut engine = QuoteDecisionEngine::new(config(), Arc::new(QuoteState::new()));
        assert!(engine.evaluate_last().is_empty());
    }

    #[test]
    fn test_crossed_quote_cancelled() {
        let cfg = config();
        let bid = slot(QuoteSide::Bid, SlotStatus::Live, dec!(100));
        let action = decide(&bid, px(dec!(100)), true, true, &cfg).unwrap();
        assert_eq!(action.reason, ActionReason::Crossed);

        let ask = slot(QuoteSide::Ask, SlotStatus::Live, dec!(99.5));
        let action = decide(&ask, px(dec!(100)), true, true, &cfg).unwrap();
        assert_eq!(action.reason, ActionReason::Crossed);
    }

    #[test]
    fn test_cancel_distance_is_inclusive() {
        let cfg = config();
        // 99.95 is exactly 5 bps below 100
        let bid = slot(QuoteSide::Bid, SlotStatus::Live, dec!(99.95));
        let action = decide(&bid, px(dec!(100)), true, true, &cfg).unwrap();
        assert_eq!(action.reason, ActionReason::TooClose);
    }

    #[test]
    fn test_rebalance_distance_is_exclusive() {
        let cfg = config();
        // 99.80 is exactly 20 bps below 100
        let bid = slot(QuoteSide::Bid, SlotStatus::Live, dec!(99.80));
        assert!(decide(&bid, px(dec!(100)), true, true, &cfg).is_none());

        let bid = slot(QuoteSide::Bid, SlotStatus::Live, dec!(99.79));
        let action = decide(&bid, px(dec!(100)), true, true, &cfg).unwrap();
        assert_eq!(action.reason, ActionReason::Stale);
    }

    #[test]
    fn test_pending_over_limit_requests_deferred_cancel_once() {
        let cfg = config();
        let mut pending = slot(QuoteSide::Ask, SlotStatus::Pending, dec!(100.1));
        let action = decide(&pending, px(dec!(100)), true, false, &cfg).unwrap();
        assert!(action.is_cancel());
        assert_eq!(action.order_id, pending.order_id);

        pending.cancel_on_ack = true;
        assert!(decide(&pending, px(dec!(100)), true, false, &cfg).is_none());
    }

    #[test]
    fn test_in_flight_and_unknown_hold() {
        let cfg = config();
        for status in [SlotStatus::Pending, SlotStatus::Cancelling, SlotStatus::Unknown] {
            let s = slot(QuoteSide::Bid, status, dec!(50));
            assert!(decide(&s, px(dec!(100)), true, true, &cfg).is_none());
            assert!(decide(&s, px(dec!(100)), false, true, &cfg).is_none());
        }
    }

    #[test]
    fn test_never_places_when_over_limit_or_volatile() {
        let cfg = config();
        let statuses = [
            SlotStatus::Empty,
            SlotStatus::Pending,
            SlotStatus::Live,
            SlotStatus::Cancelling,
            SlotStatus::Unknown,
        ];
        let references = [dec!(99), dec!(99.9), dec!(100), dec!(100.05), dec!(101)];
        for side in QuoteSide::ALL {
            for status in statuses {
                for reference in references {
                    let s = slot(side, status, dec!(100));
                    for (calm, within) in [(false, true), (true, false), (false, false)] {
                        let action = decide(&s, px(reference), calm, within, &cfg);
                        assert!(
                            !action.as_ref().is_some_and(|a| a.is_place()),
                            "place emitted for {side} {status} calm={calm} within={within}"
                        );
                        if status == SlotStatus::Live {
                            assert!(action.is_some_and(|a| a.is_cancel()));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_target_price_tick_alignment() {
        let cfg = EngineConfig {
            tick_size: dec!(0.5),
            ..config()
        };
        // 100.3 ∓ 10 bps = 100.1997 / 100.4003
        assert_eq!(target_price(QuoteSide::Bid, px(dec!(100.3)), &cfg), px(dec!(100.0)));
        assert_eq!(target_price(QuoteSide::Ask, px(dec!(100.3)), &cfg), px(dec!(100.5)));
    }

    #[test]
    fn test_coarse_tick_quote_outside_hold_band_not_placed() {
        // 100 ∓ 10 bps aligns to 99.5 / 100.5: 50 bps, past the 20 bps rebalance distance
        let cfg = EngineConfig {
            tick_size: dec!(0.5),
            ..config()
        };
        for side in QuoteSide::ALL {
            let empty = QuoteSlot::empty(side);
            assert_eq!(decide(&empty, px(dec!(100)), true, true, &cfg), None);
        }

        // 100.3 aligns the bid to 100.0 (~29.9 bps) but the ask to 100.5 (~19.9 bps)
        let bid = decide(&QuoteSlot::empty(QuoteSide::Bid), px(dec!(100.3)), true, true, &cfg);
        let ask = decide(&QuoteSlot::empty(QuoteSide::Ask), px(dec!(100.3)), true, true, &cfg);
        assert_eq!(bid, None);
        assert_eq!(ask.map(|a| a.target_price), Some(px(dec!(100.5))));
    }

    #[test]
    fn test_on_tick_counts_dropped_ticks() {
        let mut engine = calm_engine(config(), dec!(100));
        assert!(engine.admits(&PriceTick::new(1_200, px(dec!(100)))));
        assert!(!engine.admits(&PriceTick::new(900, px(dec!(100)))));
        assert!(engine.on_tick(PriceTick::new(900, px(dec!(100)))).is_empty());
        assert!(engine.on_tick(PriceTick::new(1_300, Price::ZERO)).is_empty());
        assert_eq!(engine.dropped_ticks(), 2);
    }

    #[test]
    fn test_place_size_rounded_to_lot() {
        let cfg = EngineConfig {
            order_size: dec!(0.0025),
            lot_size: dec!(0.001),
            ..config()
        };
        let empty = QuoteSlot::empty(QuoteSide::Bid);
        let action = decide(&empty, px(dec!(100)), true, true, &cfg).unwrap();
        assert_eq!(action.target_size, Size::new(dec!(0.002)));
    }
}
