use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::Config;
use crate::exec::circuit::CircuitBreaker;
use crate::exec::idempotency::{Admission, IdempotencyRegistry};
use crate::exec::nonce::NonceManager;
use crate::exec::retry::RetryPolicy;
use crate::exec::router::Executor;
use crate::gateway::chain::{ChainClient, OrderRequest};
use crate::telemetry::bus::{FILL_OBSERVED, ORDER_SUBMITTED, TelemetryBus};
use crate::types::{
    ExecError, ExecErrorKind, ExecStatus, ExecutionOutcome, Fill, Leg, Side, Signal,
    TokenId, TxResult,
};

/// Gas limit used when the chain has not supplied an estimate.
const DEFAULT_GAS_LIMIT: u64 = 300_000;
/// Gas-limit raise applied between retries after the chain reported
/// `gas required exceeds allowance` — retrying that error without raising
/// the allowance would spin.
const GAS_BUMP_NUM: u64 = 12;
const GAS_BUMP_DEN: u64 = 10;

struct LegOutcome {
    fill: Fill,
    nonce: u64,
    tx_hash: B256,
    attempts: u32,
}

/// One attempt's failure plus the gas it burned (set when the transaction
/// mined but reverted) — the breaker's gas-trip rule needs it.
struct AttemptError {
    error: ExecError,
    gas_cost_usdc: Option<Decimal>,
}

impl AttemptError {
    fn plain(error: ExecError) -> Self {
        Self { error, gas_cost_usdc: None }
    }
}

struct LegFailure {
    kind: ExecErrorKind,
    attempts: u32,
    nonce: Option<u64>,
    gas_cost_usdc: Option<Decimal>,
}

/// Live two-leg executor: idempotency check, circuit admission, then one
/// nonce-sequenced, retry-governed submission per leg through the injected
/// signing capability.
///
/// Termination guarantees: every admitted signal produces exactly one
/// terminal `TxResult`, every allocated nonce is confirmed or released, and
/// every begun idempotency key is finalized.
pub struct LiveExecutor {
    chain: Arc<dyn ChainClient>,
    breaker: Arc<CircuitBreaker>,
    nonces: Arc<NonceManager>,
    retry: RetryPolicy,
    registry: Arc<IdempotencyRegistry>,
    telemetry: Arc<TelemetryBus>,
    wallet: Address,
    fee_rate: Decimal,
    slippage_bps: Decimal,
    receipt_timeout: Duration,
    matic_usd: Arc<dyn crate::gateway::oracle::PriceOracle>,
}

impl LiveExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        breaker: Arc<CircuitBreaker>,
        nonces: Arc<NonceManager>,
        registry: Arc<IdempotencyRegistry>,
        telemetry: Arc<TelemetryBus>,
        oracle: Arc<dyn crate::gateway::oracle::PriceOracle>,
        wallet: Address,
        config: &Config,
    ) -> Self {
        Self {
            chain,
            breaker,
            nonces,
            retry: RetryPolicy::new(config.retry.clone()),
            registry,
            telemetry,
            wallet,
            fee_rate: config.fee_rate,
            slippage_bps: config.max_slippage_bps,
            receipt_timeout: config.receipt_timeout,
            matic_usd: oracle,
        }
    }

    /// One leg: allocate a nonce, then sign → submit → await receipt with
    /// retries. The nonce is reused across retries of the same logical
    /// transaction, refreshed from chain on `nonce too low`, and released on
    /// terminal failure.
    async fn execute_leg(&self, signal: &Signal, leg: Leg) -> Result<LegOutcome, LegFailure> {
        let opp = &signal.opportunity;
        let (token, price): (&TokenId, Decimal) = match leg {
            Leg::Yes => (&opp.pair.yes_token_id, opp.yes_vwap),
            Leg::No => (&opp.pair.no_token_id, opp.no_vwap),
        };

        let mut nonce = self.nonces.allocate();
        let mut gas_limit = DEFAULT_GAS_LIMIT;
        let mut failures: u32 = 0;
        let mut last_gas_cost: Option<Decimal> = None;

        loop {
            let attempt = failures + 1;
            let order = OrderRequest {
                token_id: token.clone(),
                side: Side::Buy,
                price,
                quantity: opp.qty,
                maker: self.wallet,
                nonce,
                gas_limit,
            };

            match self.attempt_leg(signal, leg, &order).await {
                Ok(tx_hash) => {
                    self.nonces.mark_confirmed(nonce);
                    let notional = price * opp.qty;
                    let fill = Fill {
                        token_id: token.clone(),
                        side: Side::Buy,
                        quantity: opp.qty,
                        price_vwap: price,
                        fees_paid: notional * self.fee_rate,
                        slippage_bps: self.slippage_bps,
                        tx_hash: Some(tx_hash),
                        is_simulated: false,
                        trace_id: signal.trace_id,
                        ts: chrono::Utc::now(),
                    };
                    self.telemetry.emit(
                        FILL_OBSERVED,
                        Some(signal.trace_id),
                        serde_json::json!({
                            "leg": leg.to_string(),
                            "token": token.as_ref(),
                            "price": price,
                            "quantity": opp.qty,
                            "tx_hash": tx_hash.to_string(),
                            "nonce": nonce,
                            "simulated": false,
                        }),
                    );
                    return Ok(LegOutcome { fill, nonce, tx_hash, attempts: attempt });
                }
                Err(AttemptError { error, gas_cost_usdc }) => {
                    failures += 1;
                    last_gas_cost = gas_cost_usdc;
                    let kind = error.kind.clone();
                    tracing::warn!(
                        target: "exec",
                        leg = %leg,
                        attempt,
                        %error,
                        "leg attempt failed"
                    );

                    if !self.retry.should_retry(&kind, failures) {
                        self.nonces.release(nonce);
                        return Err(LegFailure {
                            kind,
                            attempts: failures,
                            nonce: Some(nonce),
                            gas_cost_usdc: last_gas_cost,
                        });
                    }

                    match kind {
                        ExecErrorKind::NonceTooLow => {
                            // Our view is stale; the chain is the source of
                            // truth. Drop the old allocation and reseed.
                            self.nonces.release(nonce);
                            match self.chain.get_pending_nonce(self.wallet).await {
                                Ok(chain_nonce) => {
                                    self.nonces.reinitialize(chain_nonce);
                                    nonce = self.nonces.allocate();
                                }
                                Err(e) => {
                                    return Err(LegFailure {
                                        kind: e.kind,
                                        attempts: failures,
                                        nonce: None,
                                        gas_cost_usdc: last_gas_cost,
                                    });
                                }
                            }
                        }
                        ExecErrorKind::GasAllowanceExceeded => {
                            gas_limit = gas_limit * GAS_BUMP_NUM / GAS_BUMP_DEN;
                        }
                        _ => {
                            // Same logical transaction: the nonce is reused.
                        }
                    }
                    tokio::time::sleep(self.retry.delay(failures)).await;
                }
            }
        }
    }

    /// One signed submission through the capability, each stage under its
    /// own deadline. A mined-but-reverted receipt is a terminal failure that
    /// still consumed gas.
    async fn attempt_leg(
        &self,
        signal: &Signal,
        leg: Leg,
        order: &OrderRequest,
    ) -> Result<B256, AttemptError> {
        let signed = with_deadline(self.receipt_timeout, self.chain.sign_order(order))
            .await
            .map_err(AttemptError::plain)?;
        let tx_hash = with_deadline(self.receipt_timeout, self.chain.submit_order(&signed))
            .await
            .map_err(AttemptError::plain)?;

        self.telemetry.emit(
            ORDER_SUBMITTED,
            Some(signal.trace_id),
            serde_json::json!({
                "leg": leg.to_string(),
                "token": order.token_id.as_ref(),
                "price": order.price,
                "quantity": order.quantity,
                "nonce": order.nonce,
                "tx_hash": tx_hash.to_string(),
                "simulated": false,
            }),
        );

        let receipt = self
            .chain
            .wait_for_receipt(tx_hash, self.receipt_timeout)
            .await
            .map_err(AttemptError::plain)?;
        if !receipt.success {
            // Mined but reverted: terminal, and the gas is already spent.
            return Err(AttemptError {
                error: ExecError::new(ExecErrorKind::Reverted, "receipt status 0"),
                gas_cost_usdc: Some(receipt.cost_matic() * self.matic_usd.matic_usd()),
            });
        }
        Ok(tx_hash)
    }

    fn outcome(
        &self,
        signal: &Signal,
        status: ExecStatus,
        yes_fill: Option<Fill>,
        no_fill: Option<Fill>,
        tx_hash: Option<B256>,
        nonce: Option<u64>,
        attempts: u32,
        error_kind: Option<ExecErrorKind>,
    ) -> ExecutionOutcome {
        ExecutionOutcome {
            yes_fill,
            no_fill,
            tx: TxResult {
                trace_id: signal.trace_id,
                idempotency_key: signal.idempotency_key.clone(),
                success: status == ExecStatus::Done,
                status,
                tx_hash,
                nonce,
                attempts,
                error_kind,
                retry_after_ms: None,
            },
        }
    }
}

#[async_trait]
impl Executor for LiveExecutor {
    async fn execute_arbitrage(&self, signal: &Signal) -> ExecutionOutcome {
        let now = Instant::now();

        // 1. Idempotency: a key already owned elsewhere short-circuits
        //    before any chain traffic.
        match self.registry.begin(&signal.idempotency_key, now) {
            Admission::Admitted => {}
            Admission::Duplicate(Some(cached)) => {
                tracing::info!(
                    target: "exec",
                    key = %signal.idempotency_key,
                    "duplicate suppressed, returning cached result"
                );
                return cached;
            }
            Admission::Duplicate(None) => {
                return self.outcome(
                    signal,
                    ExecStatus::DuplicateSuppressed,
                    None,
                    None,
                    None,
                    None,
                    0,
                    None,
                );
            }
        }

        // 2. Circuit admission. The key was begun above, so every early
        //    return below must finalize it.
        let permit = match self.breaker.try_acquire(now) {
            Ok(permit) => permit,
            Err(open) => {
                tracing::warn!(
                    target: "exec",
                    retry_after_ms = open.retry_after.as_millis() as u64,
                    "submission rejected: circuit open"
                );
                let mut outcome =
                    self.outcome(signal, ExecStatus::CircuitOpen, None, None, None, None, 0, None);
                outcome.tx.retry_after_ms = Some(open.retry_after.as_millis() as u64);
                self.registry.finalize(&signal.idempotency_key, &outcome, Instant::now());
                return outcome;
            }
        };

        // 3–5. Leg 1.
        let leg1 = match self.execute_leg(signal, Leg::Yes).await {
            Ok(leg) => leg,
            Err(failure) => {
                permit.failure(failure.gas_cost_usdc, Instant::now());
                let outcome = self.outcome(
                    signal,
                    ExecStatus::Failed,
                    None,
                    None,
                    None,
                    failure.nonce,
                    failure.attempts,
                    Some(failure.kind),
                );
                self.registry.finalize(&signal.idempotency_key, &outcome, Instant::now());
                return outcome;
            }
        };

        // 6–7. Leg 2 with a fresh nonce. A terminal failure here leaves a
        // one-legged position: surface PARTIAL, never unwind silently.
        match self.execute_leg(signal, Leg::No).await {
            Ok(leg2) => {
                permit.success(Instant::now());
                let attempts = leg1.attempts + leg2.attempts;
                let outcome = self.outcome(
                    signal,
                    ExecStatus::Done,
                    Some(leg1.fill),
                    Some(leg2.fill),
                    Some(leg2.tx_hash),
                    Some(leg2.nonce),
                    attempts,
                    None,
                );
                self.registry.finalize(&signal.idempotency_key, &outcome, Instant::now());
                outcome
            }
            Err(failure) => {
                permit.failure(failure.gas_cost_usdc, Instant::now());
                let attempts = leg1.attempts + failure.attempts;
                let outcome = self.outcome(
                    signal,
                    ExecStatus::Partial,
                    Some(leg1.fill),
                    None,
                    Some(leg1.tx_hash),
                    failure.nonce.or(Some(leg1.nonce)),
                    attempts,
                    Some(failure.kind),
                );
                self.registry.finalize(&signal.idempotency_key, &outcome, Instant::now());
                outcome
            }
        }
    }
}

/// Deadline wrapper for capability calls: an elapsed deadline surfaces as a
/// retryable timeout.
async fn with_deadline<T>(
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T, ExecError>>,
) -> Result<T, ExecError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExecError::new(ExecErrorKind::Timeout, "capability call deadline elapsed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RetryConfig};
    use crate::gateway::chain::{GasEstimate, SignedOrder, TxReceipt};
    use crate::gateway::oracle::StaticOracle;
    use crate::types::{ArbitrageOpportunity, EdgeBreakdown, EdgeDecision, MarketPair};
    use alloy::primitives::U256;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use uuid::Uuid;

    /// Scriptable chain capability: queued submit results are consumed in
    /// order; when the queue is empty, submissions succeed.
    struct MockChain {
        sign_calls: AtomicU32,
        submit_calls: AtomicU32,
        submit_script: Mutex<VecDeque<Result<(), ExecError>>>,
        revert_script: Mutex<VecDeque<bool>>,
        hash_counter: AtomicU64,
        pending_nonce: AtomicU64,
    }

    impl MockChain {
        fn new() -> Self {
            Self {
                sign_calls: AtomicU32::new(0),
                submit_calls: AtomicU32::new(0),
                submit_script: Mutex::new(VecDeque::new()),
                revert_script: Mutex::new(VecDeque::new()),
                hash_counter: AtomicU64::new(1),
                pending_nonce: AtomicU64::new(0),
            }
        }

        fn script_submit(&self, results: Vec<Result<(), ExecError>>) {
            *self.submit_script.lock() = results.into();
        }

        fn script_reverts(&self, reverts: Vec<bool>) {
            *self.revert_script.lock() = reverts.into();
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn sign_order(&self, _order: &OrderRequest) -> Result<SignedOrder, ExecError> {
            self.sign_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SignedOrder(vec![0xab]))
        }

        async fn submit_order(&self, _signed: &SignedOrder) -> Result<B256, ExecError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(result) = self.submit_script.lock().pop_front() {
                result?;
            }
            let n = self.hash_counter.fetch_add(1, Ordering::SeqCst);
            Ok(B256::from(U256::from(n)))
        }

        async fn get_balance(&self, _wallet: Address) -> Result<Decimal, ExecError> {
            Ok(dec!(1000))
        }

        async fn get_pending_nonce(&self, _wallet: Address) -> Result<u64, ExecError> {
            Ok(self.pending_nonce.load(Ordering::SeqCst))
        }

        async fn get_gas_estimate(&self) -> Result<GasEstimate, ExecError> {
            Ok(GasEstimate {
                base_fee_gwei: dec!(30),
                priority_fee_gwei: dec!(2),
                gas_limit: 300_000,
            })
        }

        async fn wait_for_receipt(
            &self,
            tx_hash: B256,
            _timeout: Duration,
        ) -> Result<TxReceipt, ExecError> {
            let reverted = self.revert_script.lock().pop_front().unwrap_or(false);
            Ok(TxReceipt {
                tx_hash,
                success: !reverted,
                gas_used: U256::from(120_000u64),
                effective_gas_price_wei: U256::from(32_000_000_000u64),
            })
        }
    }

    struct World {
        chain: Arc<MockChain>,
        breaker: Arc<CircuitBreaker>,
        nonces: Arc<NonceManager>,
        registry: Arc<IdempotencyRegistry>,
        executor: LiveExecutor,
    }

    fn make_world() -> World {
        let chain = Arc::new(MockChain::new());
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default(),
            Arc::new(TelemetryBus::disconnected()),
        ));
        let nonces = Arc::new(NonceManager::new(0));
        let registry = Arc::new(IdempotencyRegistry::new(Duration::from_secs(300)));

        let mut config = Config::from_env();
        config.retry = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            jitter: false,
        };
        config.receipt_timeout = Duration::from_secs(5);
        config.fee_rate = dec!(0.0035);

        let executor = LiveExecutor::new(
            chain.clone(),
            breaker.clone(),
            nonces.clone(),
            registry.clone(),
            Arc::new(TelemetryBus::disconnected()),
            Arc::new(StaticOracle(dec!(0.50))),
            Address::ZERO,
            &config,
        );
        World { chain, breaker, nonces, registry, executor }
    }

    fn make_signal(key: &str) -> Signal {
        let pair = Arc::new(MarketPair {
            market_id: "mkt-1".into(),
            yes_token_id: Arc::from("tok-yes"),
            no_token_id: Arc::from("tok-no"),
            question: "?".into(),
            end_date: chrono::Utc::now(),
        });
        let trace_id = Uuid::new_v4();
        let opportunity = ArbitrageOpportunity {
            pair,
            yes_vwap: dec!(0.45),
            no_vwap: dec!(0.50),
            yes_qty: dec!(10),
            no_qty: dec!(10),
            qty: dec!(10),
            trade_size_usdc: dec!(10),
            expected_profit_per_unit: dec!(0.05),
            expected_profit_total: dec!(0.50),
            detected_at: Instant::now(),
            detected_ts: chrono::Utc::now(),
            trace_id,
        };
        Signal {
            edge: EdgeBreakdown {
                gross_edge: dec!(0.50),
                fees_est: dec!(0.03325),
                slippage_est: dec!(0.00475),
                gas_est: dec!(0.01),
                latency_buffer: dec!(0.002),
                net_edge: dec!(0.45),
                min_threshold: dec!(0.05),
                decision: EdgeDecision::Accept,
                reject_reason: None,
                risk_tags: vec![],
            },
            idempotency_key: key.to_string(),
            trace_id,
            strategy_tag: "atomic_arb",
            opportunity,
        }
    }

    /// Happy path: two legs confirm on nonces 0 and 1, fills carry tx
    /// hashes, the key finalizes DONE_SUCCESS.
    #[tokio::test]
    async fn test_two_leg_success() {
        let w = make_world();
        let signal = make_signal("k-success");

        let outcome = w.executor.execute_arbitrage(&signal).await;
        assert!(outcome.tx.success);
        assert_eq!(outcome.tx.status, ExecStatus::Done);
        assert_eq!(outcome.tx.attempts, 2);
        assert_eq!(outcome.tx.nonce, Some(1));

        let yes = outcome.yes_fill.expect("yes fill");
        let no = outcome.no_fill.expect("no fill");
        assert!(!yes.is_simulated && !no.is_simulated);
        assert!(yes.tx_hash.is_some() && no.tx_hash.is_some());
        assert_ne!(yes.tx_hash, no.tx_hash);

        assert_eq!(w.nonces.confirmed_count(), 2);
        assert_eq!(w.nonces.pending_count(), 0);
        assert_eq!(
            w.registry.status("k-success"),
            Some(crate::exec::idempotency::IdempotencyStatus::DoneSuccess)
        );
    }

    /// P6: resubmitting the same key returns the cached result without
    /// touching the signing capability again.
    #[tokio::test]
    async fn test_idempotent_resubmission() {
        let w = make_world();
        let signal = make_signal("k-idem");

        let first = w.executor.execute_arbitrage(&signal).await;
        let signs_after_first = w.chain.sign_calls.load(Ordering::SeqCst);
        let second = w.executor.execute_arbitrage(&signal).await;

        assert_eq!(signs_after_first, 2);
        assert_eq!(w.chain.sign_calls.load(Ordering::SeqCst), 2, "no extra signing");
        assert_eq!(second.tx.tx_hash, first.tx.tx_hash);
        assert_eq!(second.tx.nonce, first.tx.nonce);
        assert_eq!(second.tx.status, ExecStatus::Done);
    }

    /// Retryable submit failures back off, reuse the nonce, and succeed
    /// within budget.
    #[tokio::test]
    async fn test_retry_then_success() {
        let w = make_world();
        w.chain.script_submit(vec![
            Err(ExecError::new(ExecErrorKind::Timeout, "t/o")),
            Ok(()),
            Ok(()),
        ]);
        let signal = make_signal("k-retry");

        let outcome = w.executor.execute_arbitrage(&signal).await;
        assert!(outcome.tx.success);
        // Leg 1 took 2 attempts, leg 2 one.
        assert_eq!(outcome.tx.attempts, 3);
        // Leg 1 kept nonce 0 across its retry.
        assert_eq!(outcome.yes_fill.unwrap().tx_hash.is_some(), true);
        assert_eq!(w.nonces.confirmed_count(), 2);
        assert_eq!(w.nonces.pending_count(), 0);
    }

    /// P8: a leg stops after max_retries + 1 attempts and the signal fails
    /// terminally with its nonce released.
    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let w = make_world();
        w.chain.script_submit(
            (0..8)
                .map(|_| Err(ExecError::new(ExecErrorKind::Timeout, "t/o")))
                .collect(),
        );
        let signal = make_signal("k-exhaust");

        let outcome = w.executor.execute_arbitrage(&signal).await;
        assert!(!outcome.tx.success);
        assert_eq!(outcome.tx.status, ExecStatus::Failed);
        assert_eq!(outcome.tx.attempts, 4, "max_retries(3) + 1");
        assert_eq!(outcome.tx.error_kind, Some(ExecErrorKind::Timeout));
        assert_eq!(w.chain.submit_calls.load(Ordering::SeqCst), 4);
        assert_eq!(w.nonces.pending_count(), 0, "nonce released");
        assert_eq!(
            w.registry.status("k-exhaust"),
            Some(crate::exec::idempotency::IdempotencyStatus::DoneFailure)
        );
    }

    /// Scenario 6: leg 1 confirms, leg 2 reverts terminally. PARTIAL is
    /// surfaced with the confirmed fill, the key finalizes DONE_FAILURE.
    #[tokio::test]
    async fn test_partial_fill_surfaced() {
        let w = make_world();
        // Leg 1 receipt fine; leg 2 receipt reverted (terminal, no retry).
        w.chain.script_reverts(vec![false, true]);
        let signal = make_signal("k-partial");

        let outcome = w.executor.execute_arbitrage(&signal).await;
        assert!(!outcome.tx.success);
        assert_eq!(outcome.tx.status, ExecStatus::Partial);
        assert!(outcome.yes_fill.is_some());
        assert!(outcome.no_fill.is_none());
        assert_eq!(outcome.tx.error_kind, Some(ExecErrorKind::Reverted));
        assert_eq!(
            w.registry.status("k-partial"),
            Some(crate::exec::idempotency::IdempotencyStatus::DoneFailure)
        );
        // Leg 1's nonce confirmed; leg 2's released.
        assert_eq!(w.nonces.confirmed_count(), 1);
        assert_eq!(w.nonces.pending_count(), 0);
    }

    /// Scenario 5 head: with the breaker pre-tripped, signals fail fast
    /// with CIRCUIT_OPEN and no chain traffic.
    #[tokio::test]
    async fn test_circuit_open_fails_fast() {
        let w = make_world();
        let now = Instant::now();
        for _ in 0..3 {
            w.breaker.try_acquire(now).unwrap().failure(None, now);
        }
        let signal = make_signal("k-open");

        let outcome = w.executor.execute_arbitrage(&signal).await;
        assert_eq!(outcome.tx.status, ExecStatus::CircuitOpen);
        // The rejection carries the remaining cooldown as a deadline.
        let retry_after = outcome.tx.retry_after_ms.expect("retry-after present");
        assert!(retry_after <= 60_000, "{retry_after}");
        assert_eq!(w.chain.sign_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            w.registry.status("k-open"),
            Some(crate::exec::idempotency::IdempotencyStatus::DoneFailure)
        );
    }

    /// `nonce too low` reseeds from the chain's pending view before the
    /// retry.
    #[tokio::test]
    async fn test_nonce_too_low_reseeds() {
        let w = make_world();
        w.chain.pending_nonce.store(7, Ordering::SeqCst);
        w.chain.script_submit(vec![
            Err(ExecError::new(ExecErrorKind::NonceTooLow, "nonce too low")),
            Ok(()),
            Ok(()),
        ]);
        let signal = make_signal("k-nonce");

        let outcome = w.executor.execute_arbitrage(&signal).await;
        assert!(outcome.tx.success);
        // Leg 1 retried on nonce 7; leg 2 used 8.
        assert_eq!(outcome.tx.nonce, Some(8));
        assert_eq!(w.nonces.next_nonce(), 9);
    }
}
