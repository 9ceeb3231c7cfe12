use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::book::{floor_qty, OrderBookStore};
use crate::config::Config;
use crate::engine::anomaly::AnomalyGuard;
use crate::engine::detector::Detector;
use crate::engine::edge::EdgeCalculator;
use crate::engine::pnl::PnlTracker;
use crate::engine::risk::{RiskManager, ANOMALY_BLOCK_SEVERITY, ANOMALY_DEGRADE_SEVERITY};
use crate::exec::circuit::CircuitBreaker;
use crate::exec::idempotency::IdempotencyRegistry;
use crate::exec::router::ExecutionRouter;
use crate::feeds::clob::TokenUpdate;
use crate::gateway::chain::{ChainClient, GasEstimate};
use crate::gateway::oracle::PriceOracle;
use crate::telemetry::bus::{
    self as events, Stage, TelemetryBus,
};
use crate::types::{
    ArbitrageOpportunity, ExecStatus, ExecutionOutcome, MarketPair, Signal, TokenId,
};

/// Book value the risk gates see in dry-run, where no wallet exists.
const DRY_RUN_BALANCE: Decimal = dec!(1000000);

// ─── Signal queue ───────────────────────────────────────────────────────────

/// What happened to a pushed signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// An older queued signal for the same pair was replaced by this one.
    Coalesced,
    /// The queue was full of other pairs; the oldest signal was evicted to
    /// make room (reported, never silent).
    EvictedOldest(String),
}

/// Bounded signal buffer between detection and the execution workers.
/// When detection outruns execution, newer signals for a pair replace the
/// queued one instead of piling up.
pub struct SignalQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Signal>>,
    notify: Notify,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, signal: Signal) -> PushOutcome {
        let mut queue = self.inner.lock();
        let outcome = if let Some(slot) = queue
            .iter_mut()
            .find(|s| s.opportunity.pair.market_id == signal.opportunity.pair.market_id)
        {
            *slot = signal;
            PushOutcome::Coalesced
        } else if queue.len() >= self.capacity {
            let evicted = queue.pop_front().expect("queue non-empty at capacity");
            queue.push_back(signal);
            PushOutcome::EvictedOldest(evicted.opportunity.pair.market_id.clone())
        } else {
            queue.push_back(signal);
            PushOutcome::Queued
        };
        drop(queue);
        self.notify.notify_one();
        outcome
    }

    pub async fn pop(&self) -> Signal {
        loop {
            if let Some(signal) = self.inner.lock().pop_front() {
                return signal;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// A completed pair waiting for its market to resolve. Housekeeping
/// reconciles it once the end date passes: proxy PnL becomes final and the
/// position is released.
struct PendingSettlement {
    trace_id: Uuid,
    market_id: String,
    resolves_at: DateTime<Utc>,
}

/// Degrade an opportunity under anomaly pressure: admit half the size.
fn degrade(opp: &mut ArbitrageOpportunity) {
    opp.qty = floor_qty(opp.qty / Decimal::from(2u32));
    opp.expected_profit_total = opp.expected_profit_per_unit * opp.qty;
}

/// Core engine loop. Single task owning detector, edge calculator, risk
/// manager, anomaly guard and PnL tracker; execution runs in a bounded
/// worker pool that reports every terminal outcome back here.
///
/// Exits when the feed side closes the update channel.
#[allow(clippy::too_many_arguments)]
pub async fn run_engine(
    config: Config,
    store: Arc<OrderBookStore>,
    pairs: Vec<Arc<MarketPair>>,
    tokens: Vec<TokenId>,
    mut update_rx: mpsc::Receiver<TokenUpdate>,
    router: Arc<ExecutionRouter>,
    breaker: Arc<CircuitBreaker>,
    registry: Arc<IdempotencyRegistry>,
    oracle: Arc<dyn PriceOracle>,
    chain: Option<Arc<dyn ChainClient>>,
    wallet: Address,
    telemetry: Arc<TelemetryBus>,
) {
    let detector = Detector::new(store.clone(), pairs.clone(), &tokens, &config);
    let edge_calc = EdgeCalculator::new(&config, oracle);
    let mut risk = RiskManager::new(&config);
    let mut anomaly = AnomalyGuard::new(&config.anomaly);
    let mut pnl = PnlTracker::new();
    let mut settlements: Vec<PendingSettlement> = Vec::new();

    let mut balance = DRY_RUN_BALANCE;
    let mut gas = GasEstimate {
        base_fee_gwei: Decimal::ZERO,
        priority_fee_gwei: Decimal::ZERO,
        gas_limit: 0,
    };

    // ── Execution worker pool ──
    let queue = Arc::new(SignalQueue::new(64));
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<(Signal, ExecutionOutcome)>(64);
    let mut workers = Vec::new();
    for _ in 0..config.max_concurrent_executions.max(1) {
        let queue = queue.clone();
        let router = router.clone();
        let outcome_tx = outcome_tx.clone();
        let telemetry = telemetry.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let signal = queue.pop().await;
                telemetry.stage(signal.trace_id, Stage::Submitted, Instant::now());
                let outcome = router.route(&signal).await;
                if outcome_tx.send((signal, outcome)).await.is_err() {
                    return;
                }
            }
        }));
    }
    drop(outcome_tx);

    let mut housekeeping = tokio::time::interval(Duration::from_secs(1));
    housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        target: "engine",
        pairs = pairs.len(),
        dry_run = router.is_dry_run(),
        "engine started"
    );

    loop {
        tokio::select! {
            update = update_rx.recv() => {
                let Some(update) = update else {
                    tracing::info!(target: "engine", "feed channel closed, engine stopping");
                    break;
                };
                handle_update(
                    update, &detector, &edge_calc, &risk, &mut anomaly, &mut pnl,
                    &queue, &breaker, &telemetry, balance, &gas, &store,
                );
            }
            outcome = outcome_rx.recv() => {
                let Some((signal, outcome)) = outcome else { break };
                handle_outcome(signal, outcome, &mut risk, &mut pnl, &mut settlements, &telemetry);
            }
            _ = housekeeping.tick() => {
                let now = Instant::now();
                let now_ms = chrono::Utc::now().timestamp_millis();
                registry.sweep(now);
                telemetry.sweep_stale_traces(Duration::from_secs(60));
                anomaly.evict_idle(now_ms);
                risk.on_realized_pnl(Decimal::ZERO, chrono::Utc::now().date_naive());
                settle_due(&mut settlements, chrono::Utc::now(), &mut risk, &mut pnl, &telemetry);
                if let Some(chain) = &chain {
                    if let Ok(b) = chain.get_balance(wallet).await {
                        balance = b;
                    }
                    if let Ok(g) = chain.get_gas_estimate().await {
                        gas = g;
                    }
                }
            }
        }
    }

    for worker in workers {
        worker.abort();
    }
    tracing::info!(
        target: "engine",
        realized = %pnl.cumulative_realized_pnl,
        simulated = %pnl.cumulative_simulated_pnl,
        drawdown = %pnl.max_drawdown,
        "engine stopped"
    );
}

#[allow(clippy::too_many_arguments)]
fn handle_update(
    update: TokenUpdate,
    detector: &Detector,
    edge_calc: &EdgeCalculator,
    risk: &RiskManager,
    anomaly: &mut AnomalyGuard,
    pnl: &mut PnlTracker,
    queue: &SignalQueue,
    breaker: &Arc<CircuitBreaker>,
    telemetry: &TelemetryBus,
    balance: Decimal,
    gas: &GasEstimate,
    store: &OrderBookStore,
) {
    let now_ms = chrono::Utc::now().timestamp_millis();

    for mut opp in detector.on_token_update(update.token_index) {
        telemetry.begin_trace(opp.trace_id, update.recv_at, update.applied_at, opp.detected_at);
        telemetry.emit(
            events::OPPORTUNITY_DETECTED,
            Some(opp.trace_id),
            serde_json::json!({
                "market_id": opp.pair.market_id,
                "yes_vwap": opp.yes_vwap,
                "no_vwap": opp.no_vwap,
                "qty": opp.qty,
                "expected_profit_total": opp.expected_profit_total,
            }),
        );

        // Anomaly window feeds off the same books the detector saw.
        observe_pair(anomaly, store, &opp, now_ms);
        let assessment = anomaly.assess(&opp.pair.market_id);
        if assessment.severity >= ANOMALY_BLOCK_SEVERITY {
            telemetry.emit(
                events::ANOMALY_FLAG,
                Some(opp.trace_id),
                serde_json::json!({
                    "market_id": opp.pair.market_id,
                    "severity": assessment.severity,
                    "action": "block",
                }),
            );
            breaker.force_open(Instant::now());
        } else if assessment.severity >= ANOMALY_DEGRADE_SEVERITY {
            telemetry.emit(
                events::ANOMALY_FLAG,
                Some(opp.trace_id),
                serde_json::json!({
                    "market_id": opp.pair.market_id,
                    "severity": assessment.severity,
                    "action": "degrade",
                }),
            );
            degrade(&mut opp);
            if opp.qty <= Decimal::ZERO {
                continue;
            }
        }

        let edge = edge_calc.evaluate(&opp, gas);
        if let Some(reason) = edge.reject_reason {
            telemetry.emit(
                events::EDGE_REJECTED,
                Some(opp.trace_id),
                serde_json::json!({
                    "market_id": opp.pair.market_id,
                    "reason": reason.to_string(),
                    "net_edge": edge.net_edge,
                    "min_threshold": edge.min_threshold,
                }),
            );
            continue;
        }

        match risk.check(&opp, &edge, balance, assessment.severity, now_ms) {
            Ok(signal) => {
                telemetry.stage(signal.trace_id, Stage::RiskPassed, Instant::now());
                telemetry.emit(
                    events::RISK_PASSED,
                    Some(signal.trace_id),
                    serde_json::json!({
                        "market_id": opp.pair.market_id,
                        "net_edge": edge.net_edge,
                        "idempotency_key": signal.idempotency_key,
                    }),
                );
                pnl.on_expected(signal.trace_id, opp.expected_profit_total);
                match queue.push(signal) {
                    PushOutcome::Queued => {}
                    PushOutcome::Coalesced => {
                        telemetry.emit(
                            events::COALESCED,
                            Some(opp.trace_id),
                            serde_json::json!({"market_id": opp.pair.market_id}),
                        );
                    }
                    PushOutcome::EvictedOldest(evicted_market) => {
                        telemetry.emit(
                            events::COALESCED,
                            Some(opp.trace_id),
                            serde_json::json!({
                                "market_id": opp.pair.market_id,
                                "evicted_market": evicted_market,
                            }),
                        );
                    }
                }
            }
            Err(reason) => {
                telemetry.emit(
                    events::RISK_REJECTED,
                    Some(opp.trace_id),
                    serde_json::json!({
                        "market_id": opp.pair.market_id,
                        "reason": reason.to_string(),
                    }),
                );
            }
        }
    }
}

fn observe_pair(
    anomaly: &mut AnomalyGuard,
    store: &OrderBookStore,
    opp: &ArbitrageOpportunity,
    now_ms: i64,
) {
    let mid = |token: &TokenId| -> Option<Decimal> {
        let book = store.snapshot(token).ok()?;
        match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2u32)),
            (None, Some(ask)) => Some(ask.price),
            _ => None,
        }
    };
    let depth = |token: &TokenId| -> Decimal {
        store.snapshot(token).map(|b| b.total_depth()).unwrap_or(Decimal::ZERO)
    };

    if let (Some(yes_mid), Some(no_mid)) = (mid(&opp.pair.yes_token_id), mid(&opp.pair.no_token_id))
    {
        let total_depth = depth(&opp.pair.yes_token_id) + depth(&opp.pair.no_token_id);
        anomaly.observe(&opp.pair.market_id, yes_mid, no_mid, total_depth, now_ms);
    }
}

fn handle_outcome(
    signal: Signal,
    outcome: ExecutionOutcome,
    risk: &mut RiskManager,
    pnl: &mut PnlTracker,
    settlements: &mut Vec<PendingSettlement>,
    telemetry: &TelemetryBus,
) {
    use crate::types::Leg;

    telemetry.stage(signal.trace_id, Stage::Terminal, Instant::now());

    let market_id = &signal.opportunity.pair.market_id;
    let mut completed = None;
    for (leg, fill) in [
        (Leg::Yes, outcome.yes_fill.clone()),
        (Leg::No, outcome.no_fill.clone()),
    ] {
        if let Some(fill) = fill {
            completed = pnl.on_fill(leg, fill);
        }
    }

    if let Some(pair_pnl) = completed {
        risk.on_executed(pair_pnl.qty);
        if !pair_pnl.is_simulated {
            risk.on_realized_pnl(pair_pnl.realized, chrono::Utc::now().date_naive());
        }
        settlements.push(PendingSettlement {
            trace_id: signal.trace_id,
            market_id: market_id.clone(),
            resolves_at: signal.opportunity.pair.end_date,
        });
        telemetry.emit(
            events::PNL_UPDATE,
            Some(signal.trace_id),
            serde_json::json!({
                "market_id": market_id,
                "qty": pair_pnl.qty,
                "cost": pair_pnl.cost,
                "realized": pair_pnl.realized,
                "expected": pair_pnl.expected,
                "is_simulated": pair_pnl.is_simulated,
                "cumulative_simulated_pnl": pnl.cumulative_simulated_pnl,
                "cumulative_realized_pnl": pnl.cumulative_realized_pnl,
                "cumulative_expected_edge": pnl.cumulative_expected_edge,
                "max_drawdown": pnl.max_drawdown,
                "settled_pnl": pnl.settled_pnl,
                "settled_qty": pnl.settled_qty,
            }),
        );
    }

    match outcome.tx.status {
        ExecStatus::Partial => {
            // One-legged position: freeze the pair and keep the orphan leg
            // on the books as exposure until the operator reconciles it.
            risk.record_partial_fill(market_id);
            if let Some(orphan) = pnl.abandon(&signal.trace_id) {
                risk.on_executed(orphan.quantity);
            }
            telemetry.emit(
                events::PARTIAL_FILL,
                Some(signal.trace_id),
                serde_json::json!({
                    "market_id": market_id,
                    "error": outcome.tx.error_kind.as_ref().map(|k| k.to_string()),
                    "nonce": outcome.tx.nonce,
                }),
            );
        }
        ExecStatus::Done => {}
        ExecStatus::Failed | ExecStatus::CircuitOpen | ExecStatus::DuplicateSuppressed => {
            pnl.abandon(&signal.trace_id);
            // Rejections are part of the outward failure surface: a
            // CIRCUIT_OPEN carries its retry-after deadline.
            telemetry.emit(
                events::EXECUTION_REJECTED,
                Some(signal.trace_id),
                serde_json::json!({
                    "market_id": market_id,
                    "status": outcome.tx.status,
                    "error": outcome.tx.error_kind.as_ref().map(|k| k.to_string()),
                    "retry_after_ms": outcome.tx.retry_after_ms,
                }),
            );
            tracing::debug!(
                target: "engine",
                market_id,
                status = ?outcome.tx.status,
                "signal did not execute"
            );
        }
    }
}

/// Reconcile completed pairs whose market has passed its end date: the
/// proxy PnL becomes final and the position is released.
fn settle_due(
    settlements: &mut Vec<PendingSettlement>,
    now: DateTime<Utc>,
    risk: &mut RiskManager,
    pnl: &mut PnlTracker,
    telemetry: &TelemetryBus,
) {
    let mut due = Vec::new();
    settlements.retain(|s| {
        if s.resolves_at <= now {
            due.push((s.trace_id, s.market_id.clone()));
            false
        } else {
            true
        }
    });

    for (trace_id, market_id) in due {
        let Some(pair) = pnl.on_settlement(&trace_id) else {
            continue;
        };
        risk.on_settled(pair.qty);
        tracing::info!(
            target: "engine",
            market_id = %market_id,
            qty = %pair.qty,
            final_pnl = %pair.realized,
            "pair settled"
        );
        telemetry.emit(
            events::SETTLEMENT_RECONCILED,
            Some(trace_id),
            serde_json::json!({
                "market_id": market_id,
                "qty": pair.qty,
                "final_pnl": pair.realized,
                "settled_pnl": pnl.settled_pnl,
                "settled_qty": pnl.settled_qty,
            }),
        );
    }
}
