//! Paper exchange: simulates post-only order handling against the replayed
//! reference price.
//!
//! Implements [`ExchangeClient`], so the engine runs unchanged against it.
//! A resting order fills in full once the reference price trades through
//! it: a bid when the price falls to or below it, an ask when the price
//! rises to or above it.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use quoter_core::{now_ms, OrderId, PositionSnapshot, Price, QuoteSide, Size};
use quoter_engine::{
    BoxFuture, ExchangeClient, ExchangeError, ExchangeResult, NewOrder, OpenOrder,
    RemoteOrderStatus,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::PaperConfig;

/// A simulated fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperFill {
    pub order_id: OrderId,
    pub side: QuoteSide,
    pub price: Price,
    pub size: Size,
}

#[derive(Debug, Default)]
struct Book {
    resting: BTreeMap<OrderId, OpenOrder>,
    closed: HashMap<OrderId, RemoteOrderStatus>,
    fills: Vec<PaperFill>,
    position: Decimal,
    last_price: Option<Price>,
    places: u64,
}

/// In-memory exchange for dry runs.
#[derive(Debug)]
pub struct PaperExchange {
    symbol: String,
    latency: Duration,
    place_latency: Option<Duration>,
    book: Mutex<Book>,
}

impl PaperExchange {
    pub fn new(symbol: impl Into<String>, config: &PaperConfig) -> Self {
        Self {
            symbol: symbol.into(),
            latency: Duration::from_millis(config.latency_ms),
            place_latency: config.place_latency_ms.map(Duration::from_millis),
            book: Mutex::new(Book {
                position: config.initial_position,
                ..Book::default()
            }),
        }
    }

    /// Feed a reference price; fills every resting order it trades through.
    pub fn on_price(&self, price: Price) -> Vec<PaperFill> {
        let mut book = self.book.lock();
        book.last_price = Some(price);

        let crossed: Vec<OrderId> = book
            .resting
            .values()
            .filter(|o| match o.side {
                QuoteSide::Bid => price <= o.price,
                QuoteSide::Ask => price >= o.price,
            })
            .map(|o| o.order_id.clone())
            .collect();

        let mut fills = Vec::with_capacity(crossed.len());
        for order_id in crossed {
            let Some(order) = book.resting.remove(&order_id) else {
                continue;
            };
            let signed = match order.side {
                QuoteSide::Bid => order.size.inner(),
                QuoteSide::Ask => -order.size.inner(),
            };
            book.position += signed;
            book.closed.insert(order_id.clone(), RemoteOrderStatus::Filled);
            info!(
                symbol = %self.symbol,
                side = %order.side,
                order_id = %order_id,
                price = %order.price,
                size = %order.size,
                position = %book.position,
                "Paper fill"
            );
            let fill = PaperFill {
                order_id,
                side: order.side,
                price: order.price,
                size: order.size,
            };
            book.fills.push(fill.clone());
            fills.push(fill);
        }
        fills
    }

    pub fn position_now(&self) -> Decimal {
        self.book.lock().position
    }

    pub fn resting_orders(&self) -> Vec<OpenOrder> {
        self.book.lock().resting.values().cloned().collect()
    }

    pub fn fills(&self) -> Vec<PaperFill> {
        self.book.lock().fills.clone()
    }

    /// Number of accepted places.
    pub fn place_count(&self) -> u64 {
        self.book.lock().places
    }

    /// Seed a resting order, as if left over from a previous session.
    pub fn seed_order(&self, order: OpenOrder) {
        self.book
            .lock()
            .resting
            .insert(order.order_id.clone(), order);
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn accept(&self, order: NewOrder) -> ExchangeResult<()> {
        if order.symbol != self.symbol {
            return Err(ExchangeError::Rejected(format!(
                "unknown symbol {}",
                order.symbol
            )));
        }
        if !order.price.is_positive() || !order.size.is_positive() {
            return Err(ExchangeError::Rejected("invalid price or size".to_string()));
        }

        let mut book = self.book.lock();
        if book.resting.contains_key(&order.order_id) || book.closed.contains_key(&order.order_id)
        {
            return Err(ExchangeError::Rejected("duplicate order id".to_string()));
        }
        if let Some(last) = book.last_price {
            let would_cross = match order.side {
                QuoteSide::Bid => order.price >= last,
                QuoteSide::Ask => order.price <= last,
            };
            if would_cross {
                return Err(ExchangeError::Rejected("post-only order would cross".to_string()));
            }
        }

        debug!(
            side = %order.side,
            order_id = %order.order_id,
            price = %order.price,
            "Paper order resting"
        );
        book.places += 1;
        book.resting.insert(
            order.order_id.clone(),
            OpenOrder {
                order_id: order.order_id,
                side: order.side,
                price: order.price,
                size: order.size,
            },
        );
        Ok(())
    }
}

impl ExchangeClient for PaperExchange {
    fn place_order(&self, order: NewOrder) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            match self.place_latency {
                // Resting before the acknowledgement arrives
                Some(latency) => {
                    let accepted = self.accept(order);
                    tokio::time::sleep(latency).await;
                    accepted
                }
                None => {
                    self.simulate_latency().await;
                    self.accept(order)
                }
            }
        })
    }

    fn cancel_order(&self, order_id: OrderId) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            self.simulate_latency().await;
            let mut book = self.book.lock();
            match book.resting.remove(&order_id) {
                Some(_) => {
                    book.closed.insert(order_id, RemoteOrderStatus::Cancelled);
                    Ok(())
                }
                None => Err(ExchangeError::NotFound),
            }
        })
    }

    fn order_status(&self, order_id: OrderId) -> BoxFuture<'_, ExchangeResult<RemoteOrderStatus>> {
        Box::pin(async move {
            self.simulate_latency().await;
            let book = self.book.lock();
            let status = if book.resting.contains_key(&order_id) {
                RemoteOrderStatus::Open
            } else {
                book.closed
                    .get(&order_id)
                    .copied()
                    .unwrap_or(RemoteOrderStatus::NotFound)
            };
            Ok(status)
        })
    }

    fn open_orders(&self) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            self.simulate_latency().await;
            Ok(self.resting_orders())
        })
    }

    fn position(&self) -> BoxFuture<'_, ExchangeResult<PositionSnapshot>> {
        Box::pin(async move {
            self.simulate_latency().await;
            Ok(PositionSnapshot::new(
                now_ms(),
                Size::new(self.position_now()),
            ))
        })
    }
}
