use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Circuit breaker knobs (see `exec::circuit`).
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip CLOSED → OPEN.
    pub consec_threshold: u32,
    /// Failure rate over the rolling window that trips CLOSED → OPEN.
    pub rate_threshold: f64,
    /// Rolling window length (calls).
    pub window: usize,
    /// How long OPEN lasts before HALF_OPEN probing.
    pub open_timeout: Duration,
    /// Max concurrent probes admitted while HALF_OPEN.
    pub half_open_max: u32,
    /// A failed call whose gas cost exceeded this (USDC) trips immediately.
    pub gas_threshold: Decimal,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            consec_threshold: 3,
            rate_threshold: 0.5,
            window: 20,
            open_timeout: Duration::from_secs(60),
            half_open_max: 3,
            gas_threshold: dec!(0.50),
        }
    }
}

/// Retry schedule knobs (see `exec::retry`).
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Disabled only in tests, where deterministic delays matter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Anomaly guard thresholds (see `engine::anomaly`).
#[derive(Clone, Debug)]
pub struct AnomalyConfig {
    /// Fractional mid-price move within the window that flags a pulse.
    pub pulse_threshold: f64,
    /// Fractional depth drop within the window that flags a rug.
    pub depth_threshold: f64,
    /// Divergence of yes+no mid sum from its rolling mean that flags decoupling.
    pub correlation_threshold: f64,
    /// Observation window.
    pub window: Duration,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            pulse_threshold: 0.10,
            depth_threshold: 0.50,
            correlation_threshold: 0.05,
            window: Duration::from_secs(30),
        }
    }
}

/// Configuration loaded from environment variables. `.env` is honored via
/// dotenvy in the binary; every field has a production default so a bare
/// environment yields a runnable dry-run config.
#[derive(Clone, Debug)]
pub struct Config {
    // Endpoints
    pub clob_ws_url: String,
    pub price_oracle_url: String,
    /// JSON file listing the market pairs to trade.
    pub markets_file: String,
    /// Directory for the date-sharded event log.
    pub event_log_dir: String,

    // Sizing & thresholds
    pub trade_size: Decimal,
    pub min_profit_threshold_pct: Decimal,
    pub min_profit_threshold_abs: Decimal,
    pub max_position_size: Decimal,
    pub max_daily_loss: Decimal,
    pub max_slippage_bps: Decimal,
    pub fee_rate: Decimal,
    pub latency_buffer_bps: Decimal,
    pub latency_buffer_cap: Decimal,
    pub max_gas_cost_usdc: Decimal,
    /// Gas price ceiling in gwei.
    pub max_gas_price: Decimal,
    /// Floor below which the detector does not even emit a candidate.
    pub prefilter_floor: Decimal,

    // Mode
    pub dry_run: bool,

    // Execution plumbing
    pub idempotency_window: Duration,
    pub receipt_timeout: Duration,
    pub max_concurrent_executions: usize,

    // Book & feed
    pub orderbook_depth_cap: usize,
    pub dedup_lru_size: u64,
    pub ws_backoff_initial: Duration,
    pub ws_backoff_max: Duration,

    // Nested blocks
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub anomaly: AnomalyConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            clob_ws_url: env_str(
                "CLOB_WS_URL",
                "wss://ws-subscriptions-clob.polymarket.com/ws/market",
            ),
            price_oracle_url: env_str(
                "PRICE_ORACLE_URL",
                "https://api.coingecko.com/api/v3/simple/price?ids=matic-network&vs_currencies=usd",
            ),
            markets_file: env_str("MARKETS_FILE", "markets.json"),
            event_log_dir: env_str("EVENT_LOG_DIR", "logs/events"),

            trade_size: env_decimal("TRADE_SIZE", dec!(10)),
            min_profit_threshold_pct: env_decimal("MIN_PROFIT_THRESHOLD_PCT", dec!(0.005)),
            min_profit_threshold_abs: env_decimal("MIN_PROFIT_THRESHOLD_ABS", dec!(0.01)),
            max_position_size: env_decimal("MAX_POSITION_SIZE", dec!(500)),
            max_daily_loss: env_decimal("MAX_DAILY_LOSS", dec!(50)),
            max_slippage_bps: env_decimal("MAX_SLIPPAGE_BPS", dec!(5)),
            fee_rate: env_decimal("FEE_RATE", dec!(0.0035)),
            latency_buffer_bps: env_decimal("LATENCY_BUFFER_BPS", dec!(2)),
            latency_buffer_cap: env_decimal("LATENCY_BUFFER_CAP", dec!(0.05)),
            max_gas_cost_usdc: env_decimal("MAX_GAS_COST_USDC", dec!(0.50)),
            max_gas_price: env_decimal("MAX_GAS_PRICE_GWEI", dec!(500)),
            prefilter_floor: env_decimal("PREFILTER_FLOOR", dec!(0.0001)),

            dry_run: env_bool("DRY_RUN", true),

            idempotency_window: Duration::from_millis(env_u64("IDEMPOTENCY_WINDOW_MS", 5_000)),
            receipt_timeout: Duration::from_millis(env_u64("RECEIPT_TIMEOUT_MS", 30_000)),
            max_concurrent_executions: env_u64("MAX_CONCURRENT_EXECUTIONS", 4) as usize,

            orderbook_depth_cap: env_u64("ORDERBOOK_DEPTH_CAP", 50) as usize,
            dedup_lru_size: env_u64("DEDUP_LRU_SIZE", 10_000),
            ws_backoff_initial: Duration::from_millis(env_u64("WS_BACKOFF_INITIAL_MS", 1_000)),
            ws_backoff_max: Duration::from_millis(env_u64("WS_BACKOFF_MAX_MS", 30_000)),

            circuit_breaker: CircuitBreakerConfig {
                consec_threshold: env_u64("CB_CONSEC_THRESHOLD", 3) as u32,
                rate_threshold: env_f64("CB_RATE_THRESHOLD", 0.5),
                window: env_u64("CB_WINDOW", 20) as usize,
                open_timeout: Duration::from_millis(env_u64("CB_OPEN_TIMEOUT_MS", 60_000)),
                half_open_max: env_u64("CB_HALF_OPEN_MAX", 3) as u32,
                gas_threshold: env_decimal("CB_GAS_THRESHOLD_USDC", dec!(0.50)),
            },
            retry: RetryConfig {
                max_retries: env_u64("RETRY_MAX_RETRIES", 3) as u32,
                base_delay: Duration::from_millis(env_u64("RETRY_BASE_DELAY_MS", 1_000)),
                max_delay: Duration::from_millis(env_u64("RETRY_MAX_DELAY_MS", 30_000)),
                multiplier: env_f64("RETRY_MULTIPLIER", 2.0),
                jitter: true,
            },
            anomaly: AnomalyConfig {
                pulse_threshold: env_f64("ANOMALY_PULSE_THRESHOLD", 0.10),
                depth_threshold: env_f64("ANOMALY_DEPTH_THRESHOLD", 0.50),
                correlation_threshold: env_f64("ANOMALY_CORRELATION_THRESHOLD", 0.05),
                window: Duration::from_millis(env_u64("ANOMALY_WINDOW_MS", 30_000)),
            },
        }
    }

    /// USDC budget routed to each leg's VWAP walk.
    pub fn per_leg_budget(&self) -> Decimal {
        self.trade_size / dec!(2)
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|s| Decimal::from_str(&s).ok())
        .unwrap_or(default)
}
