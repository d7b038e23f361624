//! JSONL tick replay.
//!
//! Reads recorded ticks, one JSON object per line, and feeds them into the
//! application's tick channel. Malformed lines are skipped with a warning.
//! With a positive speed the recorded spacing between ticks is reproduced,
//! scaled by `1 / speed`; with speed 0 ticks are sent back to back.

use std::path::Path;
use std::time::Duration;

use quoter_core::PriceTick;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::AppResult;

/// A finite, ordered sequence of recorded ticks.
#[derive(Debug, Clone)]
pub struct TickReplay {
    ticks: Vec<PriceTick>,
    speed: f64,
}

impl TickReplay {
    /// Replay from a pre-built sequence, in the given order.
    pub fn from_ticks(ticks: Vec<PriceTick>, speed: f64) -> Self {
        Self { ticks, speed }
    }

    /// Load a JSONL file.
    pub fn load(path: impl AsRef<Path>, speed: f64) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let replay = Self::parse(&content, speed);
        info!(
            path = %path.display(),
            ticks = replay.len(),
            "Tick replay loaded"
        );
        Ok(replay)
    }

    /// Parse JSONL content. Blank lines are ignored, malformed lines skipped.
    pub fn parse(content: &str, speed: f64) -> Self {
        let mut ticks = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match PriceTick::from_json_line(line) {
                Ok(tick) => ticks.push(tick),
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed tick"),
            }
        }
        Self { ticks, speed }
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn ticks(&self) -> &[PriceTick] {
        &self.ticks
    }

    /// Send every tick into `tx`. Returns the number sent; stops early if the
    /// receiver is dropped. Dropping `tx` on return ends the feed.
    pub async fn run(self, tx: mpsc::Sender<PriceTick>) -> usize {
        let mut sent = 0;
        let mut previous_ms: Option<u64> = None;

        for tick in self.ticks {
            if self.speed > 0.0 {
                if let Some(prev) = previous_ms {
                    let gap_ms = tick.timestamp_ms.saturating_sub(prev) as f64 / self.speed;
                    if gap_ms > 0.0 {
                        tokio::time::sleep(Duration::from_secs_f64(gap_ms / 1000.0)).await;
                    }
                }
                previous_ms = Some(tick.timestamp_ms);
            }

            if tx.send(tick).await.is_err() {
                debug!(sent, "Tick receiver closed, replay stopped");
                break;
            }
            sent += 1;
        }

        info!(sent, "Tick replay finished");
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::Price;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_skips_malformed_lines() {
        let content = r#"
{"timestamp_ms": 1000, "mid_price": "100.00"}
not json
{"timestamp_ms": 1100, "mid_price": "0"}

{"timestamp_ms": 1200, "mid_price": "100.05"}
"#;
        let replay = TickReplay::parse(content, 0.0);
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.ticks()[1].mid_price, Price::new(dec!(100.05)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ticks-{}.jsonl", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "{\"timestamp_ms\": 1, \"mid_price\": \"10\"}\n{\"timestamp_ms\": 2, \"mid_price\": \"11\"}\n",
        )
        .unwrap();
        let replay = TickReplay::load(&path, 0.0).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(replay.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(TickReplay::load("/nonexistent/ticks.jsonl", 0.0).is_err());
    }

    #[tokio::test]
    async fn test_run_sends_all_and_closes() {
        let ticks = vec![
            PriceTick::new(1, Price::new(dec!(100))),
            PriceTick::new(2, Price::new(dec!(101))),
        ];
        let (tx, mut rx) = mpsc::channel(8);
        let sent = TickReplay::from_ticks(ticks, 0.0).run(tx).await;
        assert_eq!(sent, 2);
        assert_eq!(rx.recv().await.map(|t| t.timestamp_ms), Some(1));
        assert_eq!(rx.recv().await.map(|t| t.timestamp_ms), Some(2));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_paces_by_speed() {
        let ticks = vec![
            PriceTick::new(0, Price::new(dec!(100))),
            PriceTick::new(2_000, Price::new(dec!(100))),
        ];
        let (tx, mut rx) = mpsc::channel(8);
        let started = tokio::time::Instant::now();
        let handle = tokio::spawn(TickReplay::from_ticks(ticks, 2.0).run(tx));
        rx.recv().await;
        rx.recv().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(handle.await.unwrap(), 2);
    }
}
