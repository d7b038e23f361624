//! Quoter - Entry Point
//!
//! Runs the quote loop against the paper exchange, driven by a recorded
//! tick file.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use quoter_bot::{AppConfig, Application, PaperExchange, TickReplay};
use quoter_engine::LogNotifier;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Single-instrument quoting bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via QUOTER_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Tick file to replay (overrides feed.tick_path)
    #[arg(short, long)]
    ticks: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    quoter_telemetry::init_logging()?;

    info!("Starting quoter v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > QUOTER_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("QUOTER_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = AppConfig::from_file(&config_path)?;
    config.validate()?;
    info!(
        symbol = %config.symbol,
        order_distance_bps = %config.engine.order_distance_bps,
        max_position = %config.engine.max_position,
        "Configuration loaded"
    );

    let Some(tick_path) = args.ticks.or_else(|| config.feed.tick_path.clone()) else {
        bail!("no tick source: set feed.tick_path or pass --ticks");
    };
    let replay = TickReplay::load(&tick_path, config.feed.speed)?;
    if replay.is_empty() {
        warn!(path = %tick_path, "Tick file is empty");
    }

    let paper = Arc::new(PaperExchange::new(config.symbol.clone(), &config.paper));
    let (tick_tx, tick_rx) = mpsc::channel(config.runtime.channel_capacity);
    let app = Application::with_paper(config, paper.clone(), Arc::new(LogNotifier))?;

    let feed = tokio::spawn(replay.run(tick_tx));
    let summary = app.run(tick_rx).await?;
    feed.abort();

    info!(
        ticks = summary.ticks,
        actions = summary.actions,
        failed_actions = summary.failed_actions,
        fills = paper.fills().len(),
        position = %paper.position_now(),
        clean_shutdown = summary.shutdown.is_clean(),
        "Session finished"
    );

    if !summary.shutdown.is_clean() {
        bail!(
            "shutdown left {} order(s) unconfirmed",
            summary.shutdown.unconfirmed.len()
        );
    }
    Ok(())
}
