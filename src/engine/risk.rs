use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::Config;
use crate::types::{
    ArbitrageOpportunity, EdgeBreakdown, EdgeDecision, RiskReject, Signal,
};

/// Severity at or above which the anomaly guard blocks outright (and the
/// runner trips the circuit breaker).
pub const ANOMALY_BLOCK_SEVERITY: f64 = 0.7;
/// Severity at or above which admitted trade size is degraded.
pub const ANOMALY_DEGRADE_SEVERITY: f64 = 0.4;

/// Ordered, short-circuiting risk gates between the edge calculator and the
/// execution router. Also owns pair suppression: a partial fill freezes its
/// market until an operator clears it.
pub struct RiskManager {
    max_position_size: Decimal,
    max_gas_cost: Decimal,
    max_daily_loss: Decimal,
    idempotency_window_ms: i64,

    /// Pairs currently held (shares), across all markets.
    current_position: Decimal,
    realized_daily_pnl: Decimal,
    pnl_date: NaiveDate,
    suppressed: HashSet<String>,
}

impl RiskManager {
    pub fn new(config: &Config) -> Self {
        Self {
            max_position_size: config.max_position_size,
            max_gas_cost: config.max_gas_cost_usdc,
            max_daily_loss: config.max_daily_loss,
            idempotency_window_ms: config.idempotency_window.as_millis() as i64,
            current_position: Decimal::ZERO,
            realized_daily_pnl: Decimal::ZERO,
            pnl_date: chrono::Utc::now().date_naive(),
            suppressed: HashSet::new(),
        }
    }

    pub fn current_position(&self) -> Decimal {
        self.current_position
    }

    pub fn realized_daily_pnl(&self) -> Decimal {
        self.realized_daily_pnl
    }

    /// Validate one opportunity. Gates run in order and stop at the first
    /// failure; a pass emits the execution-ready signal.
    pub fn check(
        &self,
        opp: &ArbitrageOpportunity,
        edge: &EdgeBreakdown,
        balance: Decimal,
        anomaly_severity: f64,
        now_ms: i64,
    ) -> Result<Signal, RiskReject> {
        // 0. Pair suppression after a partial fill: one-legged exposure makes
        //    the market's resolution economics uncertain.
        if self.suppressed.contains(&opp.pair.market_id) {
            return Err(RiskReject::ResolutionUncertain);
        }

        // 1. Both legs must be fundable at their worse price, plus gas.
        let worst_leg = opp.yes_vwap.max(opp.no_vwap);
        let required = Decimal::from(2u32) * opp.qty * worst_leg + edge.gas_est;
        if balance < required {
            return Err(RiskReject::InsufficientBalance);
        }

        // 2. Position cap.
        if self.current_position + opp.qty > self.max_position_size {
            return Err(RiskReject::PositionLimit);
        }

        // 3. Gas cap (re-checked here against the live estimate).
        if edge.gas_est > self.max_gas_cost {
            return Err(RiskReject::GasTooHigh);
        }

        // 4. Edge decision, re-checked after the balance haircut.
        if edge.decision != EdgeDecision::Accept {
            return Err(RiskReject::ProfitTooLow);
        }

        // 5. Daily loss budget must survive this trade's worst case — the
        //    full outlay, since protocol risk can strand both legs.
        let projected_worst_case = opp.qty * (opp.yes_vwap + opp.no_vwap);
        if self.realized_daily_pnl - projected_worst_case < -self.max_daily_loss {
            return Err(RiskReject::DailyLossLimit);
        }

        // 6. Anomaly guard.
        if anomaly_severity >= ANOMALY_BLOCK_SEVERITY {
            return Err(RiskReject::AbnormalVolatility);
        }

        Ok(Signal {
            idempotency_key: idempotency_key(opp, self.idempotency_window_ms, now_ms),
            trace_id: opp.trace_id,
            strategy_tag: "atomic_arb",
            opportunity: opp.clone(),
            edge: edge.clone(),
        })
    }

    /// Successful (or partial) execution adds exposure.
    pub fn on_executed(&mut self, qty: Decimal) {
        self.current_position += qty;
    }

    /// Settlement releases exposure.
    pub fn on_settled(&mut self, qty: Decimal) {
        self.current_position = (self.current_position - qty).max(Decimal::ZERO);
    }

    /// Fold realized PnL into the daily window, rolling over at UTC midnight.
    pub fn on_realized_pnl(&mut self, pnl: Decimal, date: NaiveDate) {
        if date != self.pnl_date {
            self.pnl_date = date;
            self.realized_daily_pnl = Decimal::ZERO;
        }
        self.realized_daily_pnl += pnl;
    }

    // ── Pair suppression ──

    pub fn record_partial_fill(&mut self, market_id: &str) {
        tracing::warn!(target: "risk", market_id, "pair suppressed after partial fill");
        self.suppressed.insert(market_id.to_string());
    }

    /// Operator intervention: the one-legged position has been reconciled.
    pub fn clear_suppression(&mut self, market_id: &str) -> bool {
        self.suppressed.remove(market_id)
    }

    pub fn is_suppressed(&self, market_id: &str) -> bool {
        self.suppressed.contains(market_id)
    }
}

/// Stable idempotency key: same pair, same rounded quantity, same detection
/// bucket collapse to one submission.
fn idempotency_key(opp: &ArbitrageOpportunity, window_ms: i64, now_ms: i64) -> String {
    let bucket = now_ms / window_ms.max(1);
    format!("{}:{:.4}:{}", opp.pair.market_id, opp.qty, bucket)
}
