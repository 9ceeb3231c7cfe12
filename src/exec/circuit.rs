use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::config::CircuitBreakerConfig;
use crate::telemetry::bus::{CIRCUIT_TRANSITION, TelemetryBus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Rejection handed to callers while the breaker refuses traffic.
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("CIRCUIT_OPEN: retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consec_failures: u32,
    /// Rolling outcome window, true = failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
}

/// Three-state breaker guarding the live submission path.
///
/// Every admitted call holds an [`ExecutionPermit`] and reports its outcome
/// exactly once — dropping an unreported permit counts as a failure, so a
/// cancelled task can never leak an admission.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    telemetry: Arc<TelemetryBus>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, telemetry: Arc<TelemetryBus>) -> Self {
        Self {
            config,
            telemetry,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consec_failures: 0,
                window: VecDeque::new(),
                opened_at: None,
                half_open_inflight: 0,
            }),
        }
    }

    /// Current state, applying the lazy OPEN → HALF_OPEN timeout transition.
    pub fn state(&self, now: Instant) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        inner.state
    }

    /// Ask to run one live call. CLOSED admits freely; HALF_OPEN admits up
    /// to `half_open_max` concurrent probes; OPEN rejects with the remaining
    /// cooldown.
    pub fn try_acquire(
        self: &Arc<Self>,
        now: Instant,
    ) -> Result<ExecutionPermit, CircuitOpenError> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        match inner.state {
            CircuitState::Closed => Ok(ExecutionPermit::new(self.clone())),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| now.saturating_duration_since(t));
                let retry_after = self
                    .config
                    .open_timeout
                    .saturating_sub(elapsed.unwrap_or_default());
                Err(CircuitOpenError { retry_after })
            }
            CircuitState::HalfOpen => {
                if inner.half_open_inflight < self.config.half_open_max {
                    inner.half_open_inflight += 1;
                    Ok(ExecutionPermit::new(self.clone()))
                } else {
                    Err(CircuitOpenError { retry_after: self.config.open_timeout })
                }
            }
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state == CircuitState::Open {
            let timed_out = inner
                .opened_at
                .map_or(true, |t| now.saturating_duration_since(t) >= self.config.open_timeout);
            if timed_out {
                self.transition(inner, CircuitState::HalfOpen);
                inner.half_open_inflight = 0;
            }
        }
    }

    fn record(&self, success: bool, gas_cost: Option<Decimal>, now: Instant) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.window.push_back(!success);
                while inner.window.len() > self.config.window {
                    inner.window.pop_front();
                }
                if success {
                    inner.consec_failures = 0;
                    return;
                }
                inner.consec_failures += 1;

                let consec_trip = inner.consec_failures >= self.config.consec_threshold;
                let rate_trip = inner.window.len() >= self.config.window && {
                    let failures = inner.window.iter().filter(|f| **f).count();
                    failures as f64 / inner.window.len() as f64 >= self.config.rate_threshold
                };
                let gas_trip = gas_cost.map_or(false, |g| g > self.config.gas_threshold);

                if consec_trip || rate_trip || gas_trip {
                    self.trip(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                if success {
                    // All admitted probes succeeded once the last one lands.
                    if inner.half_open_inflight == 0 {
                        self.transition(&mut inner, CircuitState::Closed);
                        inner.consec_failures = 0;
                        inner.window.clear();
                        inner.opened_at = None;
                    }
                } else {
                    // One failed probe re-opens with a refreshed timeout.
                    self.trip(&mut inner, now);
                    inner.half_open_inflight = 0;
                }
            }
            CircuitState::Open => {
                // Stragglers admitted before the trip: nothing to adjust.
            }
        }
    }

    /// External trip, used by the anomaly guard at blocking severity.
    pub fn force_open(&self, now: Instant) {
        let mut inner = self.inner.lock();
        self.trip(&mut inner, now);
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(now);
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        tracing::warn!(target: "circuit", ?from, ?to, "circuit transition");
        self.telemetry.emit(
            CIRCUIT_TRANSITION,
            None,
            serde_json::json!({"from": from, "to": to}),
        );
    }
}

/// Proof of admission. Consume with [`ExecutionPermit::success`] or
/// [`ExecutionPermit::failure`]; dropping it unreported records a failure.
#[derive(Debug)]
pub struct ExecutionPermit {
    breaker: Arc<CircuitBreaker>,
    reported: bool,
}

impl ExecutionPermit {
    fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker, reported: false }
    }

    pub fn success(mut self, now: Instant) {
        self.reported = true;
        self.breaker.record(true, None, now);
    }

    pub fn failure(mut self, gas_cost: Option<Decimal>, now: Instant) {
        self.reported = true;
        self.breaker.record(false, gas_cost, now);
    }
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.record(false, None, Instant::now());
        }
    }
}
