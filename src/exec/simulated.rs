use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::book::OrderBookStore;
use crate::config::Config;
use crate::exec::router::Executor;
use crate::telemetry::bus::{FILL_OBSERVED, ORDER_SUBMITTED, TelemetryBus};
use crate::types::{
    ExecStatus, ExecutionOutcome, Fill, Leg, Side, Signal, TokenId, TxResult,
};

/// Dry-run executor: synthesizes fills by re-walking the current live book,
/// so a simulated run prices exactly what a live one would have attempted.
/// Telemetry is structurally identical to the live path — only
/// `is_simulated` and the missing tx hash differ.
pub struct SimulatedExecutor {
    store: Arc<OrderBookStore>,
    telemetry: Arc<TelemetryBus>,
    fee_rate: Decimal,
    slippage_bps: Decimal,
}

impl SimulatedExecutor {
    pub fn new(store: Arc<OrderBookStore>, telemetry: Arc<TelemetryBus>, config: &Config) -> Self {
        Self {
            store,
            telemetry,
            fee_rate: config.fee_rate,
            slippage_bps: config.max_slippage_bps,
        }
    }

    fn fill_leg(&self, signal: &Signal, leg: Leg) -> Option<Fill> {
        let opp = &signal.opportunity;
        let token: &TokenId = match leg {
            Leg::Yes => &opp.pair.yes_token_id,
            Leg::No => &opp.pair.no_token_id,
        };
        let budget = opp.trade_size_usdc / Decimal::from(2u32);
        let walk = self.store.walk_asks_partial(token, budget).ok()?;

        let quantity = walk.qty.min(opp.qty);
        let notional = walk.vwap * quantity;
        let fill = Fill {
            token_id: token.clone(),
            side: Side::Buy,
            quantity,
            price_vwap: walk.vwap,
            fees_paid: notional * self.fee_rate,
            slippage_bps: self.slippage_bps,
            tx_hash: None,
            is_simulated: true,
            trace_id: signal.trace_id,
            ts: chrono::Utc::now(),
        };

        self.telemetry.emit(
            ORDER_SUBMITTED,
            Some(signal.trace_id),
            serde_json::json!({
                "leg": leg.to_string(),
                "token": token.as_ref(),
                "price": walk.vwap,
                "quantity": quantity,
                "simulated": true,
            }),
        );
        self.telemetry.emit(
            FILL_OBSERVED,
            Some(signal.trace_id),
            serde_json::json!({
                "leg": leg.to_string(),
                "token": token.as_ref(),
                "price": fill.price_vwap,
                "quantity": fill.quantity,
                "fees": fill.fees_paid,
                "simulated": true,
            }),
        );
        Some(fill)
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute_arbitrage(&self, signal: &Signal) -> ExecutionOutcome {
        let yes_fill = self.fill_leg(signal, Leg::Yes);
        let no_fill = self.fill_leg(signal, Leg::No);

        let (success, status) = match (&yes_fill, &no_fill) {
            (Some(_), Some(_)) => (true, ExecStatus::Done),
            (None, None) => (false, ExecStatus::Failed),
            // The book emptied on one side between detection and execution.
            _ => (false, ExecStatus::Partial),
        };

        ExecutionOutcome {
            yes_fill,
            no_fill,
            tx: TxResult {
                trace_id: signal.trace_id,
                idempotency_key: signal.idempotency_key.clone(),
                success,
                status,
                tx_hash: None,
                nonce: None,
                attempts: 1,
                error_kind: None,
                retry_after_ms: None,
            },
        }
    }
}
