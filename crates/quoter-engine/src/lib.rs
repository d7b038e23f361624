//! Quote decision engine for a single instrument.
//!
//! Keeps one post-only quote per side at a fixed basis-point distance from a
//! reference price, and pulls it when the market turns volatile, the quote
//! drifts too close or too far, or the position limit is breached.
//!
//! # Architecture
//!
//! ```text
//! PriceTick ──▶ QuoteDecisionEngine.on_tick()
//!                 ├─ TickFilter: drop out-of-order ticks
//!                 ├─ VolatilityGate: calm / volatile
//!                 ├─ PositionGuard: within / over limit
//!                 └─ decide(): per-side ActionRequest
//!                      ↓
//!              ActionSequencer.dispatch() ──▶ ExchangeClient
//!                      ↓
//!                 QuoteState (Empty/Pending/Live/Cancelling/Unknown)
//! ```

pub mod action;
pub mod config;
pub mod decision;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod notify;
pub mod position;
pub mod quote_state;
pub mod sequencer;
pub mod volatility;

pub use action::{ActionKind, ActionReason, ActionRequest};
pub use config::EngineConfig;
pub use decision::{decide, target_price, QuoteDecisionEngine};
pub use error::{EngineError, EngineResult};
pub use exchange::{
    BoxFuture, DynExchangeClient, ExchangeCall, ExchangeClient, ExchangeError, ExchangeResult,
    MockExchange, NewOrder, OpenOrder, RemoteOrderStatus,
};
pub use feed::TickFilter;
pub use notify::{Alert, AlertPriority, LogNotifier, MockNotifier, Notifier};
pub use position::PositionGuard;
pub use quote_state::{CancelStart, QuoteSlot, QuoteSnapshot, QuoteState, SlotStatus};
pub use sequencer::{
    ActionSequencer, AdoptReport, DispatchOutcome, PreparedAction, ShutdownReport,
};
pub use volatility::VolatilityGate;
