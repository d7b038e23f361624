//! Exchange client seam.
//!
//! The engine never talks to a venue directly. [`ExchangeClient`] is the
//! boundary: a live connector, the paper exchange, or [`MockExchange`] in
//! tests all plug in behind it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quoter_core::{now_ms, OrderId, PositionSnapshot, Price, QuoteSide, Size};
use thiserror::Error;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Errors reported by an exchange client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Order rejected: {0}")]
    Rejected(String),

    /// The order does not exist on the exchange (already filled or cancelled).
    #[error("Order not found")]
    NotFound,
}

impl ExchangeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::RateLimited => "rate_limited",
            Self::Rejected(_) => "rejected",
            Self::NotFound => "not_found",
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// A post-only limit order to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub symbol: String,
    pub order_id: OrderId,
    pub side: QuoteSide,
    pub price: Price,
    pub size: Size,
}

/// Exchange-side status of a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOrderStatus {
    Open,
    Filled,
    Cancelled,
    NotFound,
}

impl RemoteOrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for RemoteOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::NotFound => write!(f, "not_found"),
        }
    }
}

/// An order resting on the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub side: QuoteSide,
    pub price: Price,
    pub size: Size,
}

/// Trait for the exchange operations the engine needs.
///
/// Every method resolves once the exchange has acknowledged the request.
/// The caller bounds each call with its own timeout.
pub trait ExchangeClient: Send + Sync {
    /// Place a post-only limit order.
    fn place_order(&self, order: NewOrder) -> BoxFuture<'_, ExchangeResult<()>>;

    /// Cancel an order by client order id.
    fn cancel_order(&self, order_id: OrderId) -> BoxFuture<'_, ExchangeResult<()>>;

    /// Query one order.
    fn order_status(&self, order_id: OrderId) -> BoxFuture<'_, ExchangeResult<RemoteOrderStatus>>;

    /// List open orders for the configured instrument.
    fn open_orders(&self) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>>;

    /// Current net position for the configured instrument.
    fn position(&self) -> BoxFuture<'_, ExchangeResult<PositionSnapshot>>;
}

pub type DynExchangeClient = Arc<dyn ExchangeClient>;

/// A call recorded by [`MockExchange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCall {
    Place(NewOrder),
    Cancel(OrderId),
    Status(OrderId),
    OpenOrders,
    Position,
}

/// Scriptable exchange for tests.
///
/// Calls are recorded when issued, before the configured latency elapses.
/// Queued results are consumed in order; an empty queue means success.
#[derive(Debug)]
pub struct MockExchange {
    calls: Mutex<Vec<ExchangeCall>>,
    place_results: Mutex<VecDeque<ExchangeResult<()>>>,
    cancel_results: Mutex<VecDeque<ExchangeResult<()>>>,
    statuses: Mutex<HashMap<OrderId, RemoteOrderStatus>>,
    default_status: Mutex<RemoteOrderStatus>,
    open_orders: Mutex<Vec<OpenOrder>>,
    position: Mutex<Option<Size>>,
    latency: Mutex<Duration>,
    place_latency: Mutex<Option<Duration>>,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            place_results: Mutex::new(VecDeque::new()),
            cancel_results: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            default_status: Mutex::new(RemoteOrderStatus::NotFound),
            open_orders: Mutex::new(Vec::new()),
            position: Mutex::new(Some(Size::ZERO)),
            latency: Mutex::new(Duration::ZERO),
            place_latency: Mutex::new(None),
        }
    }

    /// Queue the result of the next place.
    pub fn push_place_result(&self, result: ExchangeResult<()>) {
        self.place_results.lock().push_back(result);
    }

    /// Queue the result of the next cancel.
    pub fn push_cancel_result(&self, result: ExchangeResult<()>) {
        self.cancel_results.lock().push_back(result);
    }

    pub fn set_order_status(&self, order_id: OrderId, status: RemoteOrderStatus) {
        self.statuses.lock().insert(order_id, status);
    }

    /// Status reported for orders without an explicit entry.
    pub fn set_default_status(&self, status: RemoteOrderStatus) {
        *self.default_status.lock() = status;
    }

    pub fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        *self.open_orders.lock() = orders;
    }

    /// Position reported by [`ExchangeClient::position`]. None makes the
    /// query fail with a network error.
    pub fn set_position(&self, position: Option<Size>) {
        *self.position.lock() = position;
    }

    /// Delay applied to every call after it is recorded.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Delay applied to places instead of the common latency.
    pub fn set_place_latency(&self, latency: Duration) {
        *self.place_latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().clone()
    }

    /// Recorded places, in call order.
    pub fn places(&self) -> Vec<NewOrder> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ExchangeCall::Place(order) => Some(order.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded cancels, in call order.
    pub fn cancels(&self) -> Vec<OrderId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ExchangeCall::Cancel(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    async fn record(&self, call: ExchangeCall) {
        let latency = match (&call, *self.place_latency.lock()) {
            (ExchangeCall::Place(_), Some(latency)) => latency,
            _ => *self.latency.lock(),
        };
        self.calls.lock().push(call);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl ExchangeClient for MockExchange {
    fn place_order(&self, order: NewOrder) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            self.record(ExchangeCall::Place(order)).await;
            self.place_results.lock().pop_front().unwrap_or(Ok(()))
        })
    }

    fn cancel_order(&self, order_id: OrderId) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            self.record(ExchangeCall::Cancel(order_id)).await;
            self.cancel_results.lock().pop_front().unwrap_or(Ok(()))
        })
    }

    fn order_status(&self, order_id: OrderId) -> BoxFuture<'_, ExchangeResult<RemoteOrderStatus>> {
        Box::pin(async move {
            self.record(ExchangeCall::Status(order_id.clone())).await;
            let status = self
                .statuses
                .lock()
                .get(&order_id)
                .copied()
                .unwrap_or(*self.default_status.lock());
            Ok(status)
        })
    }

    fn open_orders(&self) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            self.record(ExchangeCall::OpenOrders).await;
            Ok(self.open_orders.lock().clone())
        })
    }

    fn position(&self) -> BoxFuture<'_, ExchangeResult<PositionSnapshot>> {
        Box::pin(async move {
            self.record(ExchangeCall::Position).await;
            let position = *self.position.lock();
            position
                .map(|p| PositionSnapshot::new(now_ms(), p))
                .ok_or_else(|| ExchangeError::Network("position unavailable".to_string()))
        })
    }
}
