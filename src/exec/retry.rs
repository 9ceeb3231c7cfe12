use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::types::ExecErrorKind;

/// Exponential backoff with jitter plus the error classification that
/// decides whether a live-submission failure is worth another attempt.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Whether attempt `k` (1-indexed count of failures so far) may retry.
    pub fn should_retry(&self, kind: &ExecErrorKind, failures: u32) -> bool {
        failures <= self.config.max_retries && is_retryable(kind)
    }

    /// Delay before retry `k` (1-indexed):
    /// `min(max_delay, base * multiplier^(k-1)) * jitter`, jitter uniform in
    /// [0.5, 1.5).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let base_ms = self.config.base_delay.as_millis() as f64;
        let raw_ms = base_ms * self.config.multiplier.powi(exp as i32);
        let capped_ms = raw_ms.min(self.config.max_delay.as_millis() as f64);
        let jitter = if self.config.jitter {
            rand::thread_rng().gen_range(0.5..1.5)
        } else {
            1.0
        };
        Duration::from_millis((capped_ms * jitter) as u64)
    }
}

/// Transient I/O and chain-protocol failures retry; chain-terminal ones do
/// not. `GasAllowanceExceeded` is only in the retryable set because the live
/// executor raises its gas limit between attempts.
pub fn is_retryable(kind: &ExecErrorKind) -> bool {
    matches!(
        kind,
        ExecErrorKind::Timeout
            | ExecErrorKind::ConnectionReset
            | ExecErrorKind::RpcServer { .. }
            | ExecErrorKind::NonceTooLow
            | ExecErrorKind::ReplacementUnderpriced
            | ExecErrorKind::GasAllowanceExceeded
    )
}

/// Map raw RPC/provider error text onto the taxonomy. Chain clients are
/// inconsistent about error surfaces, so the matching is substring-based,
/// most specific first.
pub fn classify_error_text(message: &str) -> ExecErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("nonce too low") {
        ExecErrorKind::NonceTooLow
    } else if lower.contains("replacement") && lower.contains("underpriced") {
        ExecErrorKind::ReplacementUnderpriced
    } else if lower.contains("gas required exceeds allowance") {
        ExecErrorKind::GasAllowanceExceeded
    } else if lower.contains("insufficient funds") {
        ExecErrorKind::InsufficientFunds
    } else if lower.contains("invalid address") || lower.contains("bad address") {
        ExecErrorKind::InvalidAddress
    } else if lower.contains("revert") {
        ExecErrorKind::Reverted
    } else if lower.contains("unauthorized") || lower.contains("forbidden") {
        ExecErrorKind::Unauthorized
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ExecErrorKind::Timeout
    } else if lower.contains("connection reset") || lower.contains("broken pipe") {
        ExecErrorKind::ConnectionReset
    } else {
        // Unknown chatter from the RPC is treated as a transient 5xx.
        ExecErrorKind::RpcServer { status: 500 }
    }
}
