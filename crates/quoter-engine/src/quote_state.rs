//! Believed-live quote per side.
//!
//! Each side owns exactly one [`QuoteSlot`] that moves through
//!
//! ```text
//! Empty ──place──▶ Pending ──ack──▶ Live ──cancel──▶ Cancelling ──ack──▶ Empty
//!                    │  ▲ fail                         │  ▲ fail
//!                    │  └─ revert ◀────────────────────┘  │
//!                    └──────── timeout ──▶ Unknown ◀──────┘
//!                                            │ reconcile
//!                                            ▼
//!                                       Live | Empty
//! ```
//!
//! Only Empty accepts a new place, so a side can never hold two live orders
//! and a cancel acknowledgement is always observed before the replacing
//! place. All mutation goes through the transition methods below, which run
//! under a single lock; callers only ever see copies.

use std::fmt;

use parking_lot::Mutex;
use quoter_core::{OrderId, Price, QuoteSide, Size};
use tracing::{debug, error};

use crate::action::ActionKind;
use crate::error::{EngineError, EngineResult};

/// Lifecycle status of a quote slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    /// No order on this side.
    Empty,
    /// Place sent, acknowledgement outstanding.
    Pending,
    /// Order resting on the exchange.
    Live,
    /// Cancel sent, acknowledgement outstanding.
    Cancelling,
    /// An acknowledgement timed out. Quoting on this side is suspended until
    /// reconciliation resolves the order.
    Unknown,
}

impl SlotStatus {
    /// Whether an exchange call is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Cancelling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Pending => "pending",
            Self::Live => "live",
            Self::Cancelling => "cancelling",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side's intended or live order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSlot {
    pub side: QuoteSide,
    pub status: SlotStatus,
    pub order_id: Option<OrderId>,
    pub price: Price,
    pub size: Size,
    /// A cancel was requested while the place was still in flight.
    pub cancel_on_ack: bool,
    /// Which call timed out, for Unknown slots.
    pub unknown_after: Option<ActionKind>,
}

impl QuoteSlot {
    pub fn empty(side: QuoteSide) -> Self {
        Self {
            side,
            status: SlotStatus::Empty,
            order_id: None,
            price: Price::ZERO,
            size: Size::ZERO,
            cancel_on_ack: false,
            unknown_after: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status == SlotStatus::Empty
    }

    pub fn is_live(&self) -> bool {
        self.status == SlotStatus::Live
    }
}

/// Read-only copy of both slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSnapshot {
    pub bid: QuoteSlot,
    pub ask: QuoteSlot,
}

impl QuoteSnapshot {
    pub fn get(&self, side: QuoteSide) -> &QuoteSlot {
        match side {
            QuoteSide::Bid => &self.bid,
            QuoteSide::Ask => &self.ask,
        }
    }
}

/// Outcome of [`QuoteState::mark_cancelling`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelStart {
    /// The slot is now Cancelling; send the cancel for `order_id`.
    Dispatch {
        previous: QuoteSlot,
        order_id: OrderId,
    },
    /// The place is still in flight; the cancel goes out on its acknowledgement.
    Deferred,
}

#[derive(Debug)]
struct Slots {
    sides: [QuoteSlot; 2],
    /// Set at shutdown; no further places are accepted.
    closed: bool,
}

/// The two quote slots for the instrument.
#[derive(Debug)]
pub struct QuoteState {
    slots: Mutex<Slots>,
}

impl Default for QuoteState {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteState {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                sides: [
                    QuoteSlot::empty(QuoteSide::Bid),
                    QuoteSlot::empty(QuoteSide::Ask),
                ],
                closed: false,
            }),
        }
    }

    /// Copy of both slots.
    pub fn snapshot(&self) -> QuoteSnapshot {
        let slots = self.slots.lock();
        QuoteSnapshot {
            bid: slots.sides[QuoteSide::Bid.index()].clone(),
            ask: slots.sides[QuoteSide::Ask.index()].clone(),
        }
    }

    /// Copy of one slot.
    pub fn slot(&self, side: QuoteSide) -> QuoteSlot {
        self.slots.lock().sides[side.index()].clone()
    }

    /// Whether either side has an exchange call outstanding.
    pub fn has_in_flight(&self) -> bool {
        self.slots
            .lock()
            .sides
            .iter()
            .any(|s| s.status.is_in_flight())
    }

    /// Empty → Pending. Returns the pre-dispatch slot for [`Self::revert`].
    pub fn mark_pending(
        &self,
        side: QuoteSide,
        order_id: OrderId,
        price: Price,
        size: Size,
    ) -> EngineResult<QuoteSlot> {
        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(EngineError::Closed { side });
        }
        let slot = &mut slots.sides[side.index()];
        match slot.status {
            SlotStatus::Empty => {
                let previous = slot.clone();
                slot.status = SlotStatus::Pending;
                slot.order_id = Some(order_id);
                slot.price = price;
                slot.size = size;
                slot.cancel_on_ack = false;
                slot.unknown_after = None;
                Ok(previous)
            }
            SlotStatus::Pending | SlotStatus::Cancelling | SlotStatus::Unknown => {
                Err(busy(slot))
            }
            SlotStatus::Live => Err(invalid(slot, "place")),
        }
    }

    /// Pending → Live once the place is acknowledged.
    ///
    /// Returns true when a cancel was deferred while the place was in flight.
    pub fn mark_live(&self, side: QuoteSide, order_id: &OrderId) -> EngineResult<bool> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.sides[side.index()];
        if slot.status != SlotStatus::Pending || slot.order_id.as_ref() != Some(order_id) {
            return Err(invalid(slot, "confirm place"));
        }
        slot.status = SlotStatus::Live;
        let deferred = slot.cancel_on_ack;
        slot.cancel_on_ack = false;
        Ok(deferred)
    }

    /// Live → Cancelling, or record a deferred cancel on a Pending slot.
    pub fn mark_cancelling(&self, side: QuoteSide) -> EngineResult<CancelStart> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.sides[side.index()];
        match slot.status {
            SlotStatus::Live => {
                let Some(order_id) = slot.order_id.clone() else {
                    return Err(invalid(slot, "cancel without order id"));
                };
                let previous = slot.clone();
                slot.status = SlotStatus::Cancelling;
                Ok(CancelStart::Dispatch { previous, order_id })
            }
            SlotStatus::Pending if !slot.cancel_on_ack => {
                slot.cancel_on_ack = true;
                debug!(side = %side, "Cancel deferred until place is acknowledged");
                Ok(CancelStart::Deferred)
            }
            SlotStatus::Pending | SlotStatus::Cancelling | SlotStatus::Unknown => {
                Err(busy(slot))
            }
            SlotStatus::Empty => Err(invalid(slot, "cancel")),
        }
    }

    /// Cancelling or Unknown → Empty on a confirmed cancellation.
    pub fn clear(&self, side: QuoteSide) -> EngineResult<()> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.sides[side.index()];
        match slot.status {
            SlotStatus::Cancelling | SlotStatus::Unknown => {
                *slot = QuoteSlot::empty(side);
                Ok(())
            }
            _ => Err(invalid(slot, "clear")),
        }
    }

    /// Restore the pre-dispatch slot after a failed exchange call.
    pub fn revert(&self, side: QuoteSide, previous: QuoteSlot) -> EngineResult<()> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.sides[side.index()];
        if !slot.status.is_in_flight() {
            return Err(invalid(slot, "revert"));
        }
        *slot = previous;
        Ok(())
    }

    /// Pending or Cancelling → Unknown after an acknowledgement timeout.
    pub fn mark_unknown(&self, side: QuoteSide, after: ActionKind) -> EngineResult<()> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.sides[side.index()];
        if !slot.status.is_in_flight() {
            return Err(invalid(slot, "mark unknown"));
        }
        slot.status = SlotStatus::Unknown;
        slot.cancel_on_ack = false;
        slot.unknown_after = Some(after);
        Ok(())
    }

    /// Unknown → Live (order still open) or Empty (order gone).
    pub fn resolve_unknown(&self, side: QuoteSide, open: bool) -> EngineResult<()> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.sides[side.index()];
        if slot.status != SlotStatus::Unknown {
            return Err(invalid(slot, "reconcile"));
        }
        if open {
            slot.status = SlotStatus::Live;
            slot.unknown_after = None;
        } else {
            *slot = QuoteSlot::empty(side);
        }
        Ok(())
    }

    /// Empty → Live for an order found resting on the exchange at startup.
    pub fn adopt(
        &self,
        side: QuoteSide,
        order_id: OrderId,
        price: Price,
        size: Size,
    ) -> EngineResult<()> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.sides[side.index()];
        if slot.status != SlotStatus::Empty {
            return Err(invalid(slot, "adopt"));
        }
        slot.status = SlotStatus::Live;
        slot.order_id = Some(order_id);
        slot.price = price;
        slot.size = size;
        Ok(())
    }

    /// Stop accepting places. In-flight actions and cancels are unaffected.
    pub fn close(&self) {
        self.slots.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }

    /// Tear down both slots. Returns the slots that were not Empty.
    pub fn reset(&self) -> Vec<QuoteSlot> {
        let mut slots = self.slots.lock();
        let mut dropped = Vec::new();
        for slot in slots.sides.iter_mut() {
            if !slot.is_empty() {
                dropped.push(slot.clone());
                *slot = QuoteSlot::empty(slot.side);
            }
        }
        dropped
    }
}

fn invalid(slot: &QuoteSlot, action: &'static str) -> EngineError {
    error!(
        side = %slot.side,
        status = %slot.status,
        action,
        "Invalid quote slot transition"
    );
    EngineError::InvalidTransition {
        side: slot.side,
        status: slot.status,
        action,
    }
}

fn busy(slot: &QuoteSlot) -> EngineError {
    debug!(side = %slot.side, status = %slot.status, "Quote slot busy");
    EngineError::Busy {
        side: slot.side,
        status: slot.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn px(v: rust_decimal::Decimal) -> Price {
        Price::new(v)
    }

    fn live_bid(state: &QuoteState) -> OrderId {
        let id = OrderId::from("bid-1");
        state
            .mark_pending(QuoteSide::Bid, id.clone(), px(dec!(99.9)), Size::new(dec!(0.001)))
            .unwrap();
        state.mark_live(QuoteSide::Bid, &id).unwrap();
        id
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = QuoteState::new();
        let snap = state.snapshot();
        assert!(snap.bid.is_empty());
        assert!(snap.ask.is_empty());
        assert_eq!(snap.get(QuoteSide::Ask).side, QuoteSide::Ask);
        assert!(!state.has_in_flight());
    }

    #[test]
    fn test_place_lifecycle() {
        let state = QuoteState::new();
        let id = OrderId::from("bid-1");
        let previous = state
            .mark_pending(QuoteSide::Bid, id.clone(), px(dec!(99.9)), Size::new(dec!(0.001)))
            .unwrap();
        assert!(previous.is_empty());
        assert_eq!(state.slot(QuoteSide::Bid).status, SlotStatus::Pending);
        assert!(state.has_in_flight());

        assert!(!state.mark_live(QuoteSide::Bid, &id).unwrap());
        let slot = state.slot(QuoteSide::Bid);
        assert!(slot.is_live());
        assert_eq!(slot.order_id, Some(id));
        assert_eq!(slot.price, px(dec!(99.9)));
        assert!(state.slot(QuoteSide::Ask).is_empty());
    }

    #[test]
    fn test_cancel_lifecycle() {
        let state = QuoteState::new();
        let id = live_bid(&state);

        match state.mark_cancelling(QuoteSide::Bid).unwrap() {
            CancelStart::Dispatch { previous, order_id } => {
                assert_eq!(order_id, id);
                assert!(previous.is_live());
            }
            CancelStart::Deferred => panic!("expected dispatch"),
        }
        assert_eq!(state.slot(QuoteSide::Bid).status, SlotStatus::Cancelling);

        state.clear(QuoteSide::Bid).unwrap();
        assert!(state.slot(QuoteSide::Bid).is_empty());
    }

    #[test]
    fn test_place_on_live_is_invalid_and_unchanged() {
        let state = QuoteState::new();
        live_bid(&state);
        let before = state.snapshot();

        let err = state
            .mark_pending(QuoteSide::Bid, OrderId::from("bid-2"), px(dec!(99)), Size::ZERO)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_place_while_in_flight_is_busy() {
        let state = QuoteState::new();
        state
            .mark_pending(QuoteSide::Ask, OrderId::from("ask-1"), px(dec!(100.1)), Size::ZERO)
            .unwrap();
        let err = state
            .mark_pending(QuoteSide::Ask, OrderId::from("ask-2"), px(dec!(100.1)), Size::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Busy {
                status: SlotStatus::Pending,
                ..
            }
        ));
        assert_eq!(
            state.slot(QuoteSide::Ask).order_id,
            Some(OrderId::from("ask-1"))
        );
    }

    #[test]
    fn test_cancel_on_empty_is_invalid() {
        let state = QuoteState::new();
        let err = state.mark_cancelling(QuoteSide::Bid).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert!(state.slot(QuoteSide::Bid).is_empty());
    }

    #[test]
    fn test_cancel_while_cancelling_is_busy() {
        let state = QuoteState::new();
        live_bid(&state);
        state.mark_cancelling(QuoteSide::Bid).unwrap();
        assert!(matches!(
            state.mark_cancelling(QuoteSide::Bid),
            Err(EngineError::Busy { .. })
        ));
    }

    #[test]
    fn test_deferred_cancel_on_pending() {
        let state = QuoteState::new();
        let id = OrderId::from("bid-1");
        state
            .mark_pending(QuoteSide::Bid, id.clone(), px(dec!(99.9)), Size::ZERO)
            .unwrap();

        assert_eq!(
            state.mark_cancelling(QuoteSide::Bid).unwrap(),
            CancelStart::Deferred
        );
        assert!(state.slot(QuoteSide::Bid).cancel_on_ack);
        // A second deferral is a duplicate
        assert!(matches!(
            state.mark_cancelling(QuoteSide::Bid),
            Err(EngineError::Busy { .. })
        ));

        assert!(state.mark_live(QuoteSide::Bid, &id).unwrap());
        assert!(!state.slot(QuoteSide::Bid).cancel_on_ack);
    }

    #[test]
    fn test_mark_live_with_wrong_id_is_invalid() {
        let state = QuoteState::new();
        state
            .mark_pending(QuoteSide::Bid, OrderId::from("bid-1"), px(dec!(99.9)), Size::ZERO)
            .unwrap();
        assert!(state
            .mark_live(QuoteSide::Bid, &OrderId::from("other"))
            .is_err());
        assert_eq!(state.slot(QuoteSide::Bid).status, SlotStatus::Pending);
    }

    #[test]
    fn test_revert_after_failed_place_and_cancel() {
        let state = QuoteState::new();
        let previous = state
            .mark_pending(QuoteSide::Bid, OrderId::from("bid-1"), px(dec!(99.9)), Size::ZERO)
            .unwrap();
        state.revert(QuoteSide::Bid, previous).unwrap();
        assert!(state.slot(QuoteSide::Bid).is_empty());

        let id = live_bid(&state);
        let CancelStart::Dispatch { previous, .. } = state.mark_cancelling(QuoteSide::Bid).unwrap()
        else {
            panic!("expected dispatch");
        };
        state.revert(QuoteSide::Bid, previous).unwrap();
        let slot = state.slot(QuoteSide::Bid);
        assert!(slot.is_live());
        assert_eq!(slot.order_id, Some(id));
    }

    #[test]
    fn test_revert_when_not_in_flight_is_invalid() {
        let state = QuoteState::new();
        assert!(state
            .revert(QuoteSide::Bid, QuoteSlot::empty(QuoteSide::Bid))
            .is_err());
    }

    #[test]
    fn test_unknown_and_reconcile() {
        let state = QuoteState::new();
        state
            .mark_pending(QuoteSide::Ask, OrderId::from("ask-1"), px(dec!(100.1)), Size::ZERO)
            .unwrap();
        state.mark_unknown(QuoteSide::Ask, ActionKind::Place).unwrap();

        let slot = state.slot(QuoteSide::Ask);
        assert_eq!(slot.status, SlotStatus::Unknown);
        assert_eq!(slot.unknown_after, Some(ActionKind::Place));
        assert_eq!(slot.order_id, Some(OrderId::from("ask-1")));
        assert!(!state.has_in_flight());

        // Unknown blocks new places
        assert!(matches!(
            state.mark_pending(QuoteSide::Ask, OrderId::from("ask-2"), px(dec!(100.1)), Size::ZERO),
            Err(EngineError::Busy { .. })
        ));

        state.resolve_unknown(QuoteSide::Ask, true).unwrap();
        assert!(state.slot(QuoteSide::Ask).is_live());
    }

    #[test]
    fn test_reconcile_unknown_cancel_to_empty() {
        let state = QuoteState::new();
        live_bid(&state);
        state.mark_cancelling(QuoteSide::Bid).unwrap();
        state.mark_unknown(QuoteSide::Bid, ActionKind::Cancel).unwrap();
        state.resolve_unknown(QuoteSide::Bid, false).unwrap();
        assert!(state.slot(QuoteSide::Bid).is_empty());
    }

    #[test]
    fn test_reconcile_requires_unknown() {
        let state = QuoteState::new();
        assert!(state.resolve_unknown(QuoteSide::Bid, true).is_err());
    }

    #[test]
    fn test_adopt() {
        let state = QuoteState::new();
        state
            .adopt(QuoteSide::Bid, OrderId::from("ext-1"), px(dec!(99)), Size::new(dec!(0.001)))
            .unwrap();
        assert!(state.slot(QuoteSide::Bid).is_live());
        assert!(state
            .adopt(QuoteSide::Bid, OrderId::from("ext-2"), px(dec!(99)), Size::ZERO)
            .is_err());
    }

    #[test]
    fn test_reset_returns_dropped_slots() {
        let state = QuoteState::new();
        live_bid(&state);
        let dropped = state.reset();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].side, QuoteSide::Bid);
        assert!(state.slot(QuoteSide::Bid).is_empty());
    }

    #[test]
    fn test_closed_state_rejects_places() {
        let state = QuoteState::new();
        live_bid(&state);
        state.close();
        assert!(state.is_closed());
        assert!(matches!(
            state.mark_pending(QuoteSide::Ask, OrderId::from("ask-1"), px(dec!(100.1)), Size::ZERO),
            Err(EngineError::Closed { side: QuoteSide::Ask })
        ));
        // Cancels still go through
        assert!(state.mark_cancelling(QuoteSide::Bid).is_ok());
    }

    #[test]
    fn test_sides_are_independent() {
        let state = QuoteState::new();
        live_bid(&state);
        state.mark_cancelling(QuoteSide::Bid).unwrap();
        state
            .mark_pending(QuoteSide::Ask, OrderId::from("ask-1"), px(dec!(100.1)), Size::ZERO)
            .unwrap();
        let snap = state.snapshot();
        assert_eq!(snap.bid.status, SlotStatus::Cancelling);
        assert_eq!(snap.ask.status, SlotStatus::Pending);
    }
}
