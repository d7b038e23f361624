//! Core domain types for the quoter.
//!
//! This crate provides the fundamental types shared by the engine and the bot:
//! - `Price`, `Size`: precision-safe numeric types
//! - `QuoteSide`, `OrderId`: quote side and order identifier
//! - `PriceTick`, `PositionSnapshot`: inputs from the feed and position source

pub mod decimal;
pub mod error;
pub mod order;
pub mod types;

pub use decimal::{Price, Size, BPS_DENOMINATOR};
pub use error::{CoreError, Result};
pub use order::{OrderId, QuoteSide};
pub use types::{now_ms, PositionSnapshot, PriceTick};
