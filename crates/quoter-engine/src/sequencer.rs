//! Action sequencer.
//!
//! Executes [`ActionRequest`]s against the exchange and keeps
//! [`QuoteState`] consistent with the acknowledgements:
//!
//! - At most one action per side is in flight. A request for a busy side is
//!   rejected, never queued.
//! - Every exchange call is bounded by `ack_timeout`. A timeout marks the
//!   slot Unknown until [`ActionSequencer::reconcile`] resolves it.
//! - A failed call reverts the slot to its pre-dispatch state so a later
//!   evaluation retries.
//! - A cancel requested while the place is in flight is sent as soon as the
//!   place is acknowledged.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quoter_core::{OrderId, QuoteSide};
use quoter_telemetry::Metrics;
use tokio::sync::Notify;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::action::{ActionKind, ActionReason, ActionRequest};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::exchange::{DynExchangeClient, ExchangeError, NewOrder, OpenOrder};
use crate::notify::{AlertPriority, Notifier};
use crate::quote_state::{CancelStart, QuoteSlot, QuoteState, SlotStatus};

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The place was acknowledged; the slot is Live (or already being
    /// cancelled if a cancel was deferred).
    Placed(OrderId),
    /// The cancel was acknowledged (or the order was already gone); the slot
    /// is Empty.
    Cancelled(OrderId),
    /// The place is still in flight; the cancel follows its acknowledgement.
    CancelDeferred,
}

/// An action whose slot transition has been applied but whose exchange call
/// has not been sent yet. Produced by [`ActionSequencer::prepare`].
#[derive(Debug)]
pub enum PreparedAction {
    Place {
        request: ActionRequest,
        order_id: OrderId,
        /// Slot before the transition, restored if the place fails.
        previous: QuoteSlot,
    },
    Cancel {
        request: ActionRequest,
        start: CancelStart,
    },
}

impl PreparedAction {
    pub fn side(&self) -> QuoteSide {
        match self {
            Self::Place { request, .. } | Self::Cancel { request, .. } => request.side,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Place { .. } => ActionKind::Place,
            Self::Cancel { .. } => ActionKind::Cancel,
        }
    }
}

/// Outcome of [`ActionSequencer::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Orders confirmed cancelled (or already gone).
    pub cancelled: Vec<OrderId>,
    /// Orders whose cancel failed or was not acknowledged before the deadline.
    pub unconfirmed: Vec<OrderId>,
    /// In-flight actions were still outstanding when the deadline passed.
    pub timed_out: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.unconfirmed.is_empty() && !self.timed_out
    }
}

/// Outcome of [`ActionSequencer::adopt`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdoptReport {
    pub adopted: Vec<OrderId>,
    /// Extra orders on an already-adopted side.
    pub cancelled: Vec<OrderId>,
    pub failed: Vec<OrderId>,
}

/// Sends actions to the exchange one per side.
pub struct ActionSequencer {
    exchange: DynExchangeClient,
    state: Arc<QuoteState>,
    notifier: Arc<dyn Notifier>,
    symbol: String,
    ack_timeout: Duration,
    alert_after_failures: u32,
    /// Consecutive failures per side, indexed by `QuoteSide::index`.
    failures: [AtomicU32; 2],
    /// Signalled whenever a dispatch settles.
    settled: Notify,
}

impl ActionSequencer {
    pub fn new(
        symbol: impl Into<String>,
        config: &EngineConfig,
        exchange: DynExchangeClient,
        state: Arc<QuoteState>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            exchange,
            state,
            notifier,
            symbol: symbol.into(),
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
            alert_after_failures: config.alert_after_failures.max(1),
            failures: [AtomicU32::new(0), AtomicU32::new(0)],
            settled: Notify::new(),
        }
    }

    pub fn state(&self) -> &Arc<QuoteState> {
        &self.state
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Consecutive failures on `side` since its last success.
    pub fn consecutive_failures(&self, side: QuoteSide) -> u32 {
        self.failures[side.index()].load(Ordering::Relaxed)
    }

    /// Execute one action.
    ///
    /// Resolves once the exchange has acknowledged, failed, or timed out.
    pub async fn dispatch(&self, request: ActionRequest) -> EngineResult<DispatchOutcome> {
        let prepared = self.prepare(request)?;
        self.execute(prepared).await
    }

    /// Apply the slot transition for `request` without touching the
    /// exchange.
    ///
    /// Callers that evaluate and dispatch from one loop call this inline and
    /// run [`Self::execute`] as a separate task, so the next evaluation
    /// already sees the side as in flight.
    pub fn prepare(&self, request: ActionRequest) -> EngineResult<PreparedAction> {
        let side = request.side;
        let kind = request.kind;
        let reason = request.reason;

        let prepared = match kind {
            ActionKind::Place => {
                let order_id = OrderId::generate(side);
                self.state
                    .mark_pending(
                        side,
                        order_id.clone(),
                        request.target_price,
                        request.target_size,
                    )
                    .map(|previous| PreparedAction::Place {
                        request,
                        order_id,
                        previous,
                    })
            }
            ActionKind::Cancel => self
                .state
                .mark_cancelling(side)
                .map(|start| PreparedAction::Cancel { request, start }),
        };

        match &prepared {
            Ok(_) => {
                Metrics::action_dispatched(side.as_str(), &kind.to_string(), reason.as_str());
                self.publish_slot(side);
            }
            Err(e) => Metrics::action_failed(side.as_str(), &kind.to_string(), e.kind()),
        }
        prepared
    }

    /// Send a prepared action and settle the slot with the outcome.
    pub async fn execute(&self, prepared: PreparedAction) -> EngineResult<DispatchOutcome> {
        let side = prepared.side();
        let kind = prepared.kind();

        let result = match prepared {
            PreparedAction::Place {
                request,
                order_id,
                previous,
            } => self.send_place(request, order_id, previous).await,
            PreparedAction::Cancel { request, start } => {
                let outcome = self.run_cancel(side, start).await;
                if let (Ok(DispatchOutcome::Cancelled(done)), Some(requested)) =
                    (&outcome, &request.order_id)
                {
                    if done != requested {
                        debug!(
                            side = %side,
                            requested = %requested,
                            cancelled = %done,
                            "Cancelled order differs from the requested one"
                        );
                    }
                }
                outcome
            }
        };

        if let Err(e) = &result {
            Metrics::action_failed(side.as_str(), &kind.to_string(), e.kind());
        }
        self.publish_slot(side);
        self.settled.notify_waiters();
        result
    }

    async fn send_place(
        &self,
        request: ActionRequest,
        order_id: OrderId,
        previous: QuoteSlot,
    ) -> EngineResult<DispatchOutcome> {
        let side = request.side;
        let order = NewOrder {
            symbol: self.symbol.clone(),
            order_id: order_id.clone(),
            side,
            price: request.target_price,
            size: request.target_size,
        };
        info!(
            symbol = %self.symbol,
            side = %side,
            order_id = %order_id,
            price = %request.target_price,
            size = %request.target_size,
            "Placing quote"
        );

        let started = Instant::now();
        match timeout(self.ack_timeout, self.exchange.place_order(order)).await {
            Ok(Ok(())) => {
                Metrics::ack_latency("place", elapsed_ms(started));
                let cancel_on_ack = match self.state.mark_live(side, &order_id) {
                    Ok(cancel_on_ack) => cancel_on_ack,
                    Err(e) if self.state.is_closed() => {
                        warn!(
                            side = %side,
                            order_id = %order_id,
                            "Place acknowledged after shutdown, cancelling"
                        );
                        if let Err(cancel_err) = self.cancel_untracked(order_id.clone()).await {
                            warn!(
                                side = %side,
                                order_id = %order_id,
                                error = %cancel_err,
                                "Late order cancel failed"
                            );
                        }
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                };
                self.record_success(side);
                info!(side = %side, order_id = %order_id, "Quote live");
                if cancel_on_ack {
                    self.publish_slot(side);
                    info!(side = %side, order_id = %order_id, "Sending deferred cancel");
                    if let Err(e) = self.start_cancel(side).await {
                        warn!(side = %side, error = %e, "Deferred cancel failed");
                    }
                }
                Ok(DispatchOutcome::Placed(order_id))
            }
            Ok(Err(e)) => {
                self.state.revert(side, previous)?;
                self.record_failure(side, ActionKind::Place, &e);
                Err(EngineError::Dispatch { side, source: e })
            }
            Err(_) => {
                self.state.mark_unknown(side, ActionKind::Place)?;
                self.record_timeout(side, ActionKind::Place, &order_id);
                Err(EngineError::AckTimeout { side, order_id })
            }
        }
    }

    /// Cancel whatever the slot holds, deferring if the place is in flight.
    async fn start_cancel(&self, side: QuoteSide) -> EngineResult<DispatchOutcome> {
        let start = self.state.mark_cancelling(side)?;
        self.publish_slot(side);
        self.run_cancel(side, start).await
    }

    async fn run_cancel(&self, side: QuoteSide, start: CancelStart) -> EngineResult<DispatchOutcome> {
        match start {
            CancelStart::Deferred => Ok(DispatchOutcome::CancelDeferred),
            CancelStart::Dispatch { previous, order_id } => {
                self.send_cancel(side, previous, order_id).await
            }
        }
    }

    async fn send_cancel(
        &self,
        side: QuoteSide,
        previous: QuoteSlot,
        order_id: OrderId,
    ) -> EngineResult<DispatchOutcome> {
        info!(side = %side, order_id = %order_id, price = %previous.price, "Cancelling quote");

        let started = Instant::now();
        match timeout(self.ack_timeout, self.exchange.cancel_order(order_id.clone())).await {
            Ok(Ok(())) => {
                Metrics::ack_latency("cancel", elapsed_ms(started));
                self.state.clear(side)?;
                self.record_success(side);
                info!(side = %side, order_id = %order_id, "Quote cancelled");
                Ok(DispatchOutcome::Cancelled(order_id))
            }
            Ok(Err(e)) if e.is_not_found() => {
                self.state.clear(side)?;
                self.record_success(side);
                info!(
                    side = %side,
                    order_id = %order_id,
                    "Order already gone, slot cleared"
                );
                Ok(DispatchOutcome::Cancelled(order_id))
            }
            Ok(Err(e)) => {
                self.state.revert(side, previous)?;
                self.record_failure(side, ActionKind::Cancel, &e);
                Err(EngineError::Dispatch { side, source: e })
            }
            Err(_) => {
                self.state.mark_unknown(side, ActionKind::Cancel)?;
                self.record_timeout(side, ActionKind::Cancel, &order_id);
                Err(EngineError::AckTimeout { side, order_id })
            }
        }
    }

    /// Resolve every Unknown slot through an order-status query.
    ///
    /// Open orders become Live, anything else Empty. A failed query leaves
    /// the slot Unknown. Returns the number of slots resolved.
    pub async fn reconcile(&self) -> usize {
        let mut resolved = 0;
        for side in QuoteSide::ALL {
            let slot = self.state.slot(side);
            if slot.status != SlotStatus::Unknown {
                continue;
            }
            let Some(order_id) = slot.order_id else {
                if self.state.resolve_unknown(side, false).is_ok() {
                    resolved += 1;
                }
                continue;
            };

            match timeout(self.ack_timeout, self.exchange.order_status(order_id.clone())).await {
                Ok(Ok(status)) => {
                    if self.state.resolve_unknown(side, status.is_open()).is_ok() {
                        resolved += 1;
                        self.failures[side.index()].store(0, Ordering::Relaxed);
                        info!(
                            side = %side,
                            order_id = %order_id,
                            remote_status = %status,
                            "Unknown quote reconciled"
                        );
                    }
                }
                Ok(Err(e)) => {
                    warn!(side = %side, order_id = %order_id, error = %e, "Reconcile query failed");
                }
                Err(_) => {
                    warn!(side = %side, order_id = %order_id, "Reconcile query timed out");
                }
            }
            self.publish_slot(side);
        }
        resolved
    }

    /// Adopt orders already resting on the exchange at startup.
    ///
    /// The first order per side becomes that side's Live quote. Further
    /// orders on the same side are cancelled.
    pub async fn adopt(&self, orders: Vec<OpenOrder>) -> AdoptReport {
        let mut report = AdoptReport::default();
        for order in orders {
            let side = order.side;
            if self.state.slot(side).is_empty() {
                match self
                    .state
                    .adopt(side, order.order_id.clone(), order.price, order.size)
                {
                    Ok(()) => {
                        info!(
                            side = %side,
                            order_id = %order.order_id,
                            price = %order.price,
                            size = %order.size,
                            "Adopted resting order"
                        );
                        report.adopted.push(order.order_id);
                        self.publish_slot(side);
                        continue;
                    }
                    Err(e) => warn!(side = %side, error = %e, "Adopt failed"),
                }
            }

            info!(side = %side, order_id = %order.order_id, "Cancelling extra resting order");
            match self.cancel_untracked(order.order_id.clone()).await {
                Ok(()) => report.cancelled.push(order.order_id),
                Err(e) if e.is_not_found() => report.cancelled.push(order.order_id),
                Err(e) => {
                    warn!(side = %side, order_id = %order.order_id, error = %e, "Extra order cancel failed");
                    report.failed.push(order.order_id);
                }
            }
        }
        report
    }

    /// Stop placing, wait for in-flight actions, cancel every remaining
    /// order, and tear the quote state down. Bounded by `limit` overall.
    pub async fn shutdown(&self, limit: Duration) -> ShutdownReport {
        let deadline = Instant::now() + limit;
        let mut report = ShutdownReport::default();
        self.state.close();

        loop {
            let settled = self.settled.notified();
            if !self.state.has_in_flight() {
                break;
            }
            debug!("Waiting for in-flight actions");
            if timeout_at(deadline, settled).await.is_err() {
                warn!("In-flight actions outstanding at shutdown deadline");
                report.timed_out = true;
                break;
            }
        }

        let (bid, ask) = tokio::join!(
            self.shutdown_side(QuoteSide::Bid, deadline),
            self.shutdown_side(QuoteSide::Ask, deadline)
        );
        for (order_id, confirmed) in [bid, ask].into_iter().flatten() {
            if confirmed {
                report.cancelled.push(order_id);
            } else {
                report.unconfirmed.push(order_id);
            }
        }

        for slot in self.state.reset() {
            debug!(side = %slot.side, status = %slot.status, "Slot dropped at shutdown");
        }
        for side in QuoteSide::ALL {
            self.publish_slot(side);
        }

        if report.is_clean() {
            info!(cancelled = report.cancelled.len(), "Shutdown complete");
        } else {
            self.notifier.notify(
                "Shutdown incomplete",
                &format!(
                    "{}: unconfirmed cancels {:?}",
                    self.symbol,
                    report
                        .unconfirmed
                        .iter()
                        .map(OrderId::as_str)
                        .collect::<Vec<_>>()
                ),
                AlertPriority::High,
            );
            Metrics::alert("high");
        }
        report
    }

    /// Cancel the order held by `side`, if any. Returns the order and whether
    /// the cancel was confirmed.
    async fn shutdown_side(&self, side: QuoteSide, deadline: Instant) -> Option<(OrderId, bool)> {
        let slot = self.state.slot(side);
        let order_id = slot.order_id.clone()?;

        let confirmed = match slot.status {
            SlotStatus::Empty => return None,
            SlotStatus::Live => {
                let request = ActionRequest::cancel(
                    side,
                    Some(order_id.clone()),
                    slot.price,
                    slot.size,
                    ActionReason::Shutdown,
                );
                matches!(
                    timeout_at(deadline, self.dispatch(request)).await,
                    Ok(Ok(DispatchOutcome::Cancelled(_)))
                )
            }
            // In flight past the deadline or unresolved: best effort
            SlotStatus::Pending | SlotStatus::Cancelling | SlotStatus::Unknown => {
                // NotFound cannot confirm an order whose place may still land
                let place_in_flight = slot.status == SlotStatus::Pending
                    || (slot.status == SlotStatus::Unknown
                        && slot.unknown_after == Some(ActionKind::Place));
                info!(
                    side = %side,
                    order_id = %order_id,
                    status = %slot.status,
                    place_in_flight,
                    "Best-effort cancel"
                );
                match timeout_at(deadline, self.cancel_untracked(order_id.clone())).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) if e.is_not_found() => !place_in_flight,
                    _ => false,
                }
            }
        };

        if !confirmed {
            warn!(side = %side, order_id = %order_id, "Shutdown cancel not confirmed");
        }
        Some((order_id, confirmed))
    }

    /// Cancel an order that is not tracked by a slot. Callers decide what
    /// NotFound means.
    async fn cancel_untracked(&self, order_id: OrderId) -> Result<(), ExchangeError> {
        match timeout(self.ack_timeout, self.exchange.cancel_order(order_id)).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Network("cancel timed out".to_string())),
        }
    }

    fn record_success(&self, side: QuoteSide) {
        self.failures[side.index()].store(0, Ordering::Relaxed);
    }

    fn record_failure(&self, side: QuoteSide, kind: ActionKind, error: &ExchangeError) {
        let count = self.failures[side.index()].fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            symbol = %self.symbol,
            side = %side,
            action = %kind,
            error = %error,
            consecutive = count,
            "Exchange call failed, slot reverted"
        );
        if count % self.alert_after_failures == 0 {
            self.notifier.notify(
                &format!("Quote {kind} failed"),
                &format!("{} {side}: {error} ({count} consecutive)", self.symbol),
                AlertPriority::High,
            );
            Metrics::alert("high");
        }
    }

    fn record_timeout(&self, side: QuoteSide, kind: ActionKind, order_id: &OrderId) {
        self.failures[side.index()].fetch_add(1, Ordering::Relaxed);
        warn!(
            symbol = %self.symbol,
            side = %side,
            action = %kind,
            order_id = %order_id,
            timeout_ms = self.ack_timeout.as_millis() as u64,
            "Acknowledgement timeout, side suspended until reconciled"
        );
        self.notifier.notify(
            &format!("Quote {kind} unacknowledged"),
            &format!("{} {side}: {order_id} state unknown", self.symbol),
            AlertPriority::High,
        );
        Metrics::alert("high");
    }

    fn publish_slot(&self, side: QuoteSide) {
        Metrics::slot_status(side.as_str(), self.state.slot(side).status.as_str());
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
