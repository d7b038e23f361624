//! Engine error types.

use quoter_core::{OrderId, QuoteSide};
use thiserror::Error;

use crate::exchange::ExchangeError;
use crate::quote_state::SlotStatus;

/// Faults raised by the quoting engine.
///
/// Every variant except `InvalidConfig` is local to one side: it never blocks
/// evaluation or dispatch on the other side.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The slot state machine was asked for an illegal transition.
    /// The state is left unchanged.
    #[error("Invalid transition on {side}: cannot {action} while {status}")]
    InvalidTransition {
        side: QuoteSide,
        status: SlotStatus,
        action: &'static str,
    },

    /// An action is already in flight on this side.
    #[error("Side {side} busy ({status})")]
    Busy { side: QuoteSide, status: SlotStatus },

    /// The exchange call failed. The slot was reverted to its pre-dispatch state.
    #[error("Dispatch on {side} failed: {source}")]
    Dispatch {
        side: QuoteSide,
        #[source]
        source: ExchangeError,
    },

    /// The exchange did not acknowledge in time. The slot is now unknown.
    #[error("Acknowledgement timeout on {side} for {order_id}")]
    AckTimeout { side: QuoteSide, order_id: OrderId },

    /// Shutdown has begun; no new quotes are placed.
    #[error("Quoting closed on {side}")]
    Closed { side: QuoteSide },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Side the fault belongs to, if any.
    pub fn side(&self) -> Option<QuoteSide> {
        match self {
            Self::InvalidTransition { side, .. }
            | Self::Busy { side, .. }
            | Self::Dispatch { side, .. }
            | Self::AckTimeout { side, .. }
            | Self::Closed { side } => Some(*side),
            Self::InvalidConfig(_) => None,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Busy { .. } => "busy",
            Self::Dispatch { .. } => "dispatch",
            Self::AckTimeout { .. } => "ack_timeout",
            Self::Closed { .. } => "closed",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
