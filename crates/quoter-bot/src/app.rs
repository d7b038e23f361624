//! Main application orchestration.
//!
//! One event loop per instrument:
//! - Price ticks drive evaluation; slot transitions are applied inline and
//!   each exchange call runs as its own task
//! - Position snapshots arrive from a polling task
//! - Fallback evaluation and reconciliation run on intervals
//! - Shutdown (signal or end of feed) cancels every resting quote

use std::future::Future;
use std::sync::Arc;

use quoter_core::{PositionSnapshot, PriceTick, QuoteSide};
use quoter_engine::{
    ActionRequest, ActionSequencer, DispatchOutcome, DynExchangeClient, EngineError,
    EngineResult, Notifier, QuoteDecisionEngine, QuoteState, ShutdownReport, SlotStatus,
};
use quoter_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::paper::PaperExchange;

/// Counters for one run of the event loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub actions: u64,
    pub failed_actions: u64,
    /// Ticks dropped as out-of-order or non-positive.
    pub dropped_ticks: u64,
    pub shutdown: ShutdownReport,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    exchange: DynExchangeClient,
    /// Set when running against the paper exchange, which needs the prices.
    paper: Option<Arc<PaperExchange>>,
    engine: QuoteDecisionEngine,
    sequencer: Arc<ActionSequencer>,
}

impl Application {
    /// Create an application against any exchange client.
    pub fn new(
        config: AppConfig,
        exchange: DynExchangeClient,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        config.validate()?;

        let state = Arc::new(QuoteState::new());
        let engine = QuoteDecisionEngine::new(config.engine.clone(), state.clone());
        let sequencer = Arc::new(ActionSequencer::new(
            config.symbol.clone(),
            &config.engine,
            exchange.clone(),
            state,
            notifier,
        ));

        Ok(Self {
            config,
            exchange,
            paper: None,
            engine,
            sequencer,
        })
    }

    /// Create an application against the paper exchange.
    pub fn with_paper(
        config: AppConfig,
        paper: Arc<PaperExchange>,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        let mut app = Self::new(config, paper.clone(), notifier)?;
        app.paper = Some(paper);
        Ok(app)
    }

    pub fn state(&self) -> &Arc<QuoteState> {
        self.engine.state()
    }

    /// Adopt resting orders and load the initial position.
    ///
    /// A failed position query is not fatal: the position guard stays
    /// over-limit until the poller succeeds.
    pub async fn startup(&mut self) -> AppResult<()> {
        let ack_timeout = self.sequencer_timeout();

        match timeout(ack_timeout, self.exchange.open_orders()).await {
            Ok(Ok(orders)) => {
                let report = self.sequencer.adopt(orders).await;
                info!(
                    adopted = report.adopted.len(),
                    cancelled = report.cancelled.len(),
                    failed = report.failed.len(),
                    "Resting orders reconciled"
                );
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(quoter_engine::ExchangeError::Network(
                    "open orders query timed out".to_string(),
                )
                .into())
            }
        }

        match timeout(ack_timeout, self.exchange.position()).await {
            Ok(Ok(snapshot)) => {
                info!(position = %snapshot.net_position, "Initial position loaded");
                self.engine.on_position(snapshot);
            }
            Ok(Err(e)) => warn!(error = %e, "Initial position unavailable, quoting withheld"),
            Err(_) => warn!("Initial position query timed out, quoting withheld"),
        }
        Ok(())
    }

    /// Run until Ctrl-C or the end of the tick feed.
    pub async fn run(self, ticks: mpsc::Receiver<PriceTick>) -> AppResult<RunSummary> {
        self.run_until(ticks, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves or the tick feed ends.
    pub async fn run_until<F>(
        mut self,
        mut ticks: mpsc::Receiver<PriceTick>,
        shutdown: F,
    ) -> AppResult<RunSummary>
    where
        F: Future<Output = ()>,
    {
        self.startup().await?;

        info!(symbol = %self.config.symbol, "Starting quote loop");

        let (position_tx, mut position_rx) = mpsc::channel::<PositionSnapshot>(16);
        let poller = tokio::spawn(poll_position(
            self.exchange.clone(),
            position_tx,
            self.config.runtime.position_interval(),
            self.sequencer_timeout(),
        ));

        let mut evaluation = interval(self.config.runtime.evaluation_interval());
        evaluation.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconcile = interval(self.config.runtime.reconcile_interval());
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tasks: JoinSet<EngineResult<DispatchOutcome>> = JoinSet::new();
        let mut summary = RunSummary::default();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                maybe_tick = ticks.recv() => {
                    let Some(tick) = maybe_tick else {
                        info!("Price feed ended");
                        break;
                    };
                    summary.ticks += 1;
                    // The book only sees prices the engine accepts
                    if let Some(paper) = &self.paper {
                        if self.engine.admits(&tick) {
                            paper.on_price(tick.mid_price);
                        }
                    }
                    let actions = self.engine.on_tick(tick);
                    self.spawn_actions(actions, &mut tasks, &mut summary);
                }

                Some(snapshot) = position_rx.recv() => {
                    if self.engine.on_position(snapshot) {
                        let actions = self.engine.evaluate_last();
                        self.spawn_actions(actions, &mut tasks, &mut summary);
                    }
                }

                _ = evaluation.tick() => {
                    let actions = self.engine.evaluate_last();
                    self.spawn_actions(actions, &mut tasks, &mut summary);
                }

                _ = reconcile.tick() => {
                    if self.has_unknown() {
                        let resolved = self.sequencer.reconcile().await;
                        debug!(resolved, "Reconciliation pass");
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if !handle_dispatch_result(joined) {
                        summary.failed_actions += 1;
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!(
            ticks = summary.ticks,
            actions = summary.actions,
            "Shutting down, cancelling quotes"
        );
        summary.shutdown = self
            .sequencer
            .shutdown(self.config.runtime.shutdown_timeout())
            .await;

        // Late acknowledgements still settle: a place landing now is cancelled
        let drained = timeout(self.sequencer_timeout(), async {
            while let Some(joined) = tasks.join_next().await {
                if !handle_dispatch_result(joined) {
                    summary.failed_actions += 1;
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "Dispatch tasks abandoned after shutdown");
        }
        tasks.shutdown().await;
        poller.abort();
        summary.dropped_ticks = self.engine.dropped_ticks();

        if let Some(path) = &self.config.telemetry.metrics_path {
            match Metrics::encode() {
                Ok(text) => std::fs::write(path, text)?,
                Err(e) => warn!(error = %e, "Metrics snapshot failed"),
            }
        }

        info!(
            cancelled = summary.shutdown.cancelled.len(),
            unconfirmed = summary.shutdown.unconfirmed.len(),
            failed_actions = summary.failed_actions,
            dropped_ticks = summary.dropped_ticks,
            "Stopped"
        );
        Ok(summary)
    }

    /// Apply each action's slot transition inline, then send it as its own
    /// task. The next evaluation sees the side in flight.
    fn spawn_actions(
        &self,
        actions: Vec<ActionRequest>,
        tasks: &mut JoinSet<EngineResult<DispatchOutcome>>,
        summary: &mut RunSummary,
    ) {
        for action in actions {
            debug!(
                side = %action.side,
                kind = %action.kind,
                reason = %action.reason,
                price = %action.target_price,
                "Dispatching action"
            );
            summary.actions += 1;
            match self.sequencer.prepare(action) {
                Ok(prepared) => {
                    let sequencer = self.sequencer.clone();
                    tasks.spawn(async move { sequencer.execute(prepared).await });
                }
                Err(e) => {
                    if !handle_dispatch_error(&e) {
                        summary.failed_actions += 1;
                    }
                }
            }
        }
    }

    fn has_unknown(&self) -> bool {
        QuoteSide::ALL
            .iter()
            .any(|side| self.state().slot(*side).status == SlotStatus::Unknown)
    }

    fn sequencer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.engine.ack_timeout_ms)
    }
}

/// Log a finished dispatch. Returns false for failures worth counting.
fn handle_dispatch_result(
    joined: Result<EngineResult<DispatchOutcome>, tokio::task::JoinError>,
) -> bool {
    match joined {
        Ok(Ok(outcome)) => {
            debug!(?outcome, "Dispatch settled");
            true
        }
        Ok(Err(e)) => handle_dispatch_error(&e),
        Err(e) => {
            error!(error = %e, "Dispatch task aborted");
            false
        }
    }
}

/// Log a dispatch error. Returns false for failures worth counting.
fn handle_dispatch_error(e: &EngineError) -> bool {
    match e {
        EngineError::Busy { side, status } => {
            debug!(side = %side, status = %status, "Dispatch skipped, side busy");
            true
        }
        EngineError::Closed { side } => {
            debug!(side = %side, "Place dropped, shutting down");
            true
        }
        e => {
            warn!(side = ?e.side(), error = %e, "Dispatch failed");
            false
        }
    }
}

/// Poll the exchange position and forward snapshots until the receiver closes.
async fn poll_position(
    exchange: DynExchangeClient,
    tx: mpsc::Sender<PositionSnapshot>,
    every: std::time::Duration,
    limit: std::time::Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match timeout(limit, exchange.position()).await {
            Ok(Ok(snapshot)) => {
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Position query failed"),
            Err(_) => warn!("Position query timed out"),
        }
    }
}
