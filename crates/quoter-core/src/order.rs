//! Quote side and order identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Quote side: the bid sits below the reference price, the ask above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSide {
    Bid,
    Ask,
}

impl QuoteSide {
    /// Both sides, bid first.
    pub const ALL: [QuoteSide; 2] = [QuoteSide::Bid, QuoteSide::Ask];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }

    /// Exchange-facing order side.
    pub fn as_order_side(&self) -> &'static str {
        match self {
            Self::Bid => "buy",
            Self::Ask => "sell",
        }
    }

    /// Slot index (bid = 0, ask = 1).
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Self::Bid => 0,
            Self::Ask => 1,
        }
    }
}

impl fmt::Display for QuoteSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order identifier.
///
/// The quoter assigns a client order id before the place request leaves the
/// process, so an order can be cancelled or queried even when the place
/// acknowledgement never arrives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Create a new unique client order id.
    ///
    /// Format: `mm-{buy|sell}-{uuid_short}`
    pub fn generate(side: QuoteSide) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("mm-{}-{}", side.as_order_side(), &uuid[..8]))
    }

    /// Wrap an identifier reported by the exchange.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
