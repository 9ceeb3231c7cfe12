use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Interned token handle. Cloning is a refcount bump; books, pairs and fills
/// all share the same allocation per token.
pub type TokenId = Arc<str>;

// ─── Market Pairs ───────────────────────────────────────────────────────────

/// A binary market: one YES and one NO outcome token that resolve to 1 USDC
/// combined.
#[derive(Debug, Clone)]
pub struct MarketPair {
    pub market_id: String,
    pub yes_token_id: TokenId,
    pub no_token_id: TokenId,
    pub question: String,
    pub end_date: DateTime<Utc>,
}

impl MarketPair {
    /// Which leg a token belongs to, if any.
    pub fn leg_of(&self, token: &str) -> Option<Leg> {
        if self.yes_token_id.as_ref() == token {
            Some(Leg::Yes)
        } else if self.no_token_id.as_ref() == token {
            Some(Leg::No)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Leg {
    Yes,
    No,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Yes => write!(f, "YES"),
            Leg::No => write!(f, "NO"),
        }
    }
}

/// Taker direction of a fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Side {
    Buy,
    Sell,
}

// ─── Order Book Levels ──────────────────────────────────────────────────────

/// One price level of a depth ladder. Prices are USDC fractions in (0, 1)
/// with at least 6-digit precision; sizes are outcome-token quantities.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrderLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl OrderLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// USDC notional resting at this level.
    pub fn value(&self) -> Decimal {
        self.price * self.size
    }
}

// ─── Opportunities ──────────────────────────────────────────────────────────

/// A detected cross-side arbitrage candidate: buy YES and NO of the same
/// market for a combined VWAP below 1.0. Created by the detector, consumed
/// exactly once by the edge calculator.
#[derive(Clone, Debug)]
pub struct ArbitrageOpportunity {
    pub pair: Arc<MarketPair>,
    pub yes_vwap: Decimal,
    pub no_vwap: Decimal,
    /// Achievable quantity on each leg at its VWAP (shares, 6 dp).
    pub yes_qty: Decimal,
    pub no_qty: Decimal,
    /// min(yes_qty, no_qty) — the tradable pair quantity.
    pub qty: Decimal,
    pub trade_size_usdc: Decimal,
    pub expected_profit_per_unit: Decimal,
    pub expected_profit_total: Decimal,
    pub detected_at: Instant,
    pub detected_ts: DateTime<Utc>,
    pub trace_id: Uuid,
}

// ─── Edge Breakdown ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum EdgeDecision {
    Accept,
    Reject,
}

/// Why the edge calculator refused an opportunity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error, serde::Serialize)]
pub enum EdgeReject {
    #[error("PROFIT_TOO_LOW")]
    ProfitTooLow,
    #[error("GAS_TOO_HIGH")]
    GasTooHigh,
    #[error("SLIPPAGE_TOO_HIGH")]
    SlippageTooHigh,
    #[error("LATENCY_BUFFER_DOMINATES")]
    LatencyBufferDominates,
    #[error("NEGATIVE_NET_EDGE")]
    NegativeNetEdge,
}

/// Gross-to-net accounting for one opportunity. All terms in USDC.
/// `net_edge = gross_edge - (fees_est + slippage_est + gas_est + latency_buffer)`
/// holds exactly in decimal arithmetic.
#[derive(Clone, Debug)]
pub struct EdgeBreakdown {
    pub gross_edge: Decimal,
    pub fees_est: Decimal,
    pub slippage_est: Decimal,
    pub gas_est: Decimal,
    pub latency_buffer: Decimal,
    pub net_edge: Decimal,
    pub min_threshold: Decimal,
    pub decision: EdgeDecision,
    pub reject_reason: Option<EdgeReject>,
    pub risk_tags: Vec<&'static str>,
}

// ─── Risk ───────────────────────────────────────────────────────────────────

/// Why the risk manager refused a validated opportunity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error, serde::Serialize)]
pub enum RiskReject {
    #[error("INSUFFICIENT_BALANCE")]
    InsufficientBalance,
    #[error("POSITION_LIMIT")]
    PositionLimit,
    #[error("GAS_TOO_HIGH")]
    GasTooHigh,
    #[error("PROFIT_TOO_LOW")]
    ProfitTooLow,
    #[error("DAILY_LOSS_LIMIT")]
    DailyLossLimit,
    #[error("RESOLUTION_UNCERTAIN")]
    ResolutionUncertain,
    #[error("MANIPULATION_RISK")]
    ManipulationRisk,
    #[error("ABNORMAL_VOLATILITY")]
    AbnormalVolatility,
}

// ─── Signals ────────────────────────────────────────────────────────────────

/// A risk-validated opportunity, ready for execution. Owned by exactly one
/// execution task until a terminal `TxResult` is produced.
#[derive(Clone, Debug)]
pub struct Signal {
    pub opportunity: ArbitrageOpportunity,
    pub edge: EdgeBreakdown,
    pub idempotency_key: String,
    pub trace_id: Uuid,
    pub strategy_tag: &'static str,
}

// ─── Fills & Execution Results ──────────────────────────────────────────────

/// One executed (or simulated) leg.
#[derive(Clone, Debug)]
pub struct Fill {
    pub token_id: TokenId,
    pub side: Side,
    pub quantity: Decimal,
    pub price_vwap: Decimal,
    pub fees_paid: Decimal,
    pub slippage_bps: Decimal,
    pub tx_hash: Option<B256>,
    pub is_simulated: bool,
    pub trace_id: Uuid,
    pub ts: DateTime<Utc>,
}

impl Fill {
    /// USDC notional of the leg.
    pub fn notional(&self) -> Decimal {
        self.price_vwap * self.quantity
    }
}

/// Terminal status of one signal's execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ExecStatus {
    /// Both legs confirmed.
    Done,
    /// Leg 1 confirmed, leg 2 terminally failed. One-legged exposure remains.
    Partial,
    /// No leg confirmed.
    Failed,
    /// Circuit breaker rejected the submission.
    CircuitOpen,
    /// Idempotency registry suppressed a duplicate submission.
    DuplicateSuppressed,
}

/// Disjoint error taxonomy for the live submission path.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, serde::Serialize)]
pub enum ExecErrorKind {
    // Transient I/O — retryable.
    #[error("network timeout")]
    Timeout,
    #[error("connection reset")]
    ConnectionReset,
    #[error("rpc server error {status}")]
    RpcServer { status: u16 },
    // Chain-protocol — retryable, nonce reused where safe.
    #[error("nonce too low")]
    NonceTooLow,
    #[error("replacement transaction underpriced")]
    ReplacementUnderpriced,
    #[error("gas required exceeds allowance")]
    GasAllowanceExceeded,
    // Chain-terminal — non-retryable.
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("invalid address")]
    InvalidAddress,
    #[error("execution reverted")]
    Reverted,
    #[error("authorization failed")]
    Unauthorized,
    // Signal-level cancellation (deadline or shutdown).
    #[error("cancelled")]
    Cancelled,
}

/// Error returned by the chain capability; `kind` drives retry
/// classification, `message` carries the raw upstream text.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub message: String,
}

impl ExecError {
    pub fn new(kind: ExecErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Terminal record of one signal's trip through the execution path.
/// Exactly one is produced per admitted signal.
#[derive(Clone, Debug)]
pub struct TxResult {
    pub trace_id: Uuid,
    pub idempotency_key: String,
    pub success: bool,
    pub status: ExecStatus,
    pub tx_hash: Option<B256>,
    pub nonce: Option<u64>,
    pub attempts: u32,
    pub error_kind: Option<ExecErrorKind>,
    /// Cooldown remaining when the circuit breaker rejected the signal;
    /// set only on `CircuitOpen` results.
    pub retry_after_ms: Option<u64>,
}

/// What an executor hands back: per-leg fills plus the terminal tx record.
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub yes_fill: Option<Fill>,
    pub no_fill: Option<Fill>,
    pub tx: TxResult,
}

impl ExecutionOutcome {
    pub fn is_partial(&self) -> bool {
        self.tx.status == ExecStatus::Partial
    }
}
