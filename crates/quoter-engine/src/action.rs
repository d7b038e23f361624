//! Place/cancel requests emitted by the decision engine.

use std::fmt;

use quoter_core::{OrderId, Price, QuoteSide, Size};

/// What to do on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Place,
    Cancel,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Place => write!(f, "place"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Why an action was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionReason {
    /// Empty slot, calm market, position within limit.
    Quote,
    /// Position over the limit.
    OverLimit,
    /// Volatility gate closed.
    Volatile,
    /// Quote is on the wrong side of the reference price.
    Crossed,
    /// Quote within the cancel distance (fill risk).
    TooClose,
    /// Quote beyond the rebalance distance.
    Stale,
    /// Process shutdown.
    Shutdown,
}

impl ActionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::OverLimit => "over_limit",
            Self::Volatile => "volatile",
            Self::Crossed => "crossed",
            Self::TooClose => "too_close",
            Self::Stale => "stale",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ActionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single place or cancel for one side. Consumed by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub side: QuoteSide,
    pub kind: ActionKind,
    /// Target price for a place; the resting price for a cancel.
    pub target_price: Price,
    /// Target size for a place; the resting size for a cancel.
    pub target_size: Size,
    /// Order to cancel. None for places (the sequencer assigns the id) and
    /// for cancels of a place still in flight.
    pub order_id: Option<OrderId>,
    pub reason: ActionReason,
}

impl ActionRequest {
    #[must_use]
    pub fn place(side: QuoteSide, price: Price, size: Size) -> Self {
        Self {
            side,
            kind: ActionKind::Place,
            target_price: price,
            target_size: size,
            order_id: None,
            reason: ActionReason::Quote,
        }
    }

    #[must_use]
    pub fn cancel(
        side: QuoteSide,
        order_id: Option<OrderId>,
        price: Price,
        size: Size,
        reason: ActionReason,
    ) -> Self {
        Self {
            side,
            kind: ActionKind::Cancel,
            target_price: price,
            target_size: size,
            order_id,
            reason,
        }
    }

    pub fn is_place(&self) -> bool {
        self.kind == ActionKind::Place
    }

    pub fn is_cancel(&self) -> bool {
        self.kind == ActionKind::Cancel
    }
}
