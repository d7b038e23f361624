//! Application configuration.

use crate::error::{AppError, AppResult};
use quoter_engine::EngineConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Instrument symbol (e.g. "BTC-USD").
    pub symbol: String,

    /// Quoting parameters.
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub paper: PaperConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Fallback evaluation against the last reference price when no tick
    /// arrives. Default: 5,000.
    #[serde(default = "default_evaluation_interval_ms")]
    pub evaluation_interval_ms: u64,
    /// Reconciliation of unknown quotes. Default: 2,000.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    /// Position polling. Default: 1,000.
    #[serde(default = "default_position_interval_ms")]
    pub position_interval_ms: u64,
    /// Upper bound on the whole shutdown sequence. Default: 10,000.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Tick channel capacity. Default: 1,024.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_evaluation_interval_ms() -> u64 {
    5_000
}

fn default_reconcile_interval_ms() -> u64 {
    2_000
}

fn default_position_interval_ms() -> u64 {
    1_000
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

fn default_channel_capacity() -> usize {
    1_024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: default_evaluation_interval_ms(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            position_interval_ms: default_position_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl RuntimeConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Tick replay source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedConfig {
    /// JSONL file of `{"timestamp_ms": .., "mid_price": ".."}` lines.
    #[serde(default)]
    pub tick_path: Option<String>,
    /// Replay speed multiplier (1.0 = recorded pace, 0 = as fast as possible).
    #[serde(default)]
    pub speed: f64,
}

/// Paper exchange settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Starting net position.
    #[serde(default)]
    pub initial_position: Decimal,
    /// Simulated acknowledgement latency. Default: 0.
    #[serde(default)]
    pub latency_ms: u64,
    /// When set, places rest on the book at once and only their
    /// acknowledgement is delayed by this much. Default: unset.
    #[serde(default)]
    pub place_latency_ms: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_position: Decimal::ZERO,
            latency_ms: 0,
            place_latency_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Write a Prometheus text snapshot here on shutdown.
    #[serde(default)]
    pub metrics_path: Option<String>,
}

impl AppConfig {
    /// Minimal configuration with defaults for everything but the symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            engine: EngineConfig::default(),
            runtime: RuntimeConfig::default(),
            feed: FeedConfig::default(),
            paper: PaperConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configurations the bot cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(AppError::Config("symbol must not be empty".to_string()));
        }
        self.engine.validate()?;

        let runtime = &self.runtime;
        if runtime.evaluation_interval_ms == 0
            || runtime.reconcile_interval_ms == 0
            || runtime.position_interval_ms == 0
        {
            return Err(AppError::Config(
                "runtime intervals must be positive".to_string(),
            ));
        }
        if runtime.channel_capacity == 0 {
            return Err(AppError::Config(
                "channel_capacity must be positive".to_string(),
            ));
        }
        if !(self.feed.speed >= 0.0 && self.feed.speed.is_finite()) {
            return Err(AppError::Config(
                "feed speed must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_toml(r#"symbol = "BTC-USD""#).unwrap();
        assert_eq!(config.symbol, "BTC-USD");
        assert_eq!(config.engine.order_distance_bps, dec!(10));
        assert_eq!(config.runtime.evaluation_interval_ms, 5_000);
        assert_eq!(config.runtime.shutdown_timeout(), Duration::from_secs(10));
        assert!(config.feed.tick_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
symbol = "ETH-USD"

[engine]
order_distance_bps = 12
cancel_distance_bps = 4
rebalance_distance_bps = 30
order_size = "0.01"
max_position = "0.5"
tick_size = "0.1"
lot_size = "0.01"

[runtime]
evaluation_interval_ms = 1000
shutdown_timeout_ms = 3000

[feed]
tick_path = "data/ticks.jsonl"
speed = 10.0

[paper]
initial_position = "0.02"
latency_ms = 20
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.engine.rebalance_distance_bps, dec!(30));
        assert_eq!(config.engine.order_size, dec!(0.01));
        assert_eq!(config.runtime.evaluation_interval_ms, 1_000);
        assert_eq!(config.runtime.reconcile_interval_ms, 2_000);
        assert_eq!(config.feed.tick_path.as_deref(), Some("data/ticks.jsonl"));
        assert_eq!(config.paper.initial_position, dec!(0.02));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shipped_default_config() {
        let config = AppConfig::from_toml(include_str!("../../../config/default.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_position, dec!(0.1));
        assert_eq!(config.paper.latency_ms, 50);
        assert!(config.telemetry.metrics_path.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_distances() {
        let mut config = AppConfig::new("BTC-USD");
        config.engine.cancel_distance_bps = dec!(15);
        assert!(matches!(config.validate(), Err(AppError::Engine(_))));
    }

    #[test]
    fn test_validate_rejects_empty_symbol() {
        let config = AppConfig::new(" ");
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::from_file("/nonexistent/quoter.toml"),
            Err(AppError::Config(_))
        ));
    }
}
