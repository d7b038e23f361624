//! Quoting bot for a single instrument.
//!
//! Wires the quote decision engine to its inputs and to an exchange:
//! - Tick feed (JSONL replay) and position polling
//! - Periodic fallback evaluation and reconciliation
//! - Paper exchange for dry runs
//! - Graceful shutdown that cancels every resting quote

pub mod app;
pub mod config;
pub mod error;
pub mod paper;
pub mod replay;

pub use app::{Application, RunSummary};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use paper::PaperExchange;
pub use replay::TickReplay;
