use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{ExecStatus, ExecutionOutcome, Signal, TxResult};

/// Common surface of the simulated and live executors. A signal goes in,
/// exactly one terminal outcome comes out.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute_arbitrage(&self, signal: &Signal) -> ExecutionOutcome;
}

/// Dispatches each signal to the dry-run or live path. The mode flag is
/// read once per signal — never per leg — so a mid-flight toggle can not
/// split a pair across executors.
pub struct ExecutionRouter {
    dry_run: AtomicBool,
    simulated: Arc<dyn Executor>,
    live: Option<Arc<dyn Executor>>,
}

impl ExecutionRouter {
    pub fn new(
        dry_run: bool,
        simulated: Arc<dyn Executor>,
        live: Option<Arc<dyn Executor>>,
    ) -> Self {
        Self {
            dry_run: AtomicBool::new(dry_run),
            simulated,
            live,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.load(Ordering::Relaxed)
    }

    pub fn set_dry_run(&self, dry_run: bool) {
        self.dry_run.store(dry_run, Ordering::Relaxed);
    }

    pub async fn route(&self, signal: &Signal) -> ExecutionOutcome {
        let dry_run = self.dry_run.load(Ordering::Relaxed);
        if dry_run {
            return self.simulated.execute_arbitrage(signal).await;
        }
        match &self.live {
            Some(live) => live.execute_arbitrage(signal).await,
            None => {
                // Live mode without an injected chain capability cannot
                // trade; fail the signal rather than silently simulating.
                tracing::error!(target: "exec", "live mode without a chain capability");
                failed_outcome(signal.trace_id, &signal.idempotency_key)
            }
        }
    }
}

fn failed_outcome(trace_id: Uuid, idempotency_key: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        yes_fill: None,
        no_fill: None,
        tx: TxResult {
            trace_id,
            idempotency_key: idempotency_key.to_string(),
            success: false,
            status: ExecStatus::Failed,
            tx_hash: None,
            nonce: None,
            attempts: 0,
            error_kind: None,
            retry_after_ms: None,
        },
    }
}
