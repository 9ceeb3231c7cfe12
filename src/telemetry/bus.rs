use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

// ─── Event names ────────────────────────────────────────────────────────────

pub const EVENT_RECEIVED: &str = "event_received";
pub const OPPORTUNITY_DETECTED: &str = "opportunity_detected";
pub const EDGE_REJECTED: &str = "edge_rejected";
pub const RISK_PASSED: &str = "risk_passed";
pub const RISK_REJECTED: &str = "risk_rejected";
pub const ORDER_SUBMITTED: &str = "order_submitted";
pub const FILL_OBSERVED: &str = "fill_observed";
pub const PNL_UPDATE: &str = "pnl_update";
pub const SEQUENCE_GAP: &str = "sequence_gap";
pub const DEDUP_HIT: &str = "dedup_hit";
pub const DECODE_ERROR: &str = "decode_error";
pub const WS_DISCONNECT: &str = "ws_disconnect";
pub const WS_CONNECTED: &str = "ws_connected";
pub const BOOK_RESEED: &str = "book_reseed";
pub const COALESCED: &str = "coalesced";
pub const CIRCUIT_TRANSITION: &str = "circuit_transition";
pub const PARTIAL_FILL: &str = "partial_fill";
pub const EXECUTION_REJECTED: &str = "execution_rejected";
pub const SETTLEMENT_RECONCILED: &str = "settlement_reconciled";
pub const ANOMALY_FLAG: &str = "anomaly_flag";
pub const TRACE_LATENCY: &str = "trace_latency";

/// One line of the append-only event log.
#[derive(Clone, Debug, Serialize)]
pub struct EventRecord {
    pub event_type: &'static str,
    /// Wall-clock epoch milliseconds.
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Uuid>,
    pub data: serde_json::Value,
}

// ─── Trace latency attribution ──────────────────────────────────────────────

/// Pipeline stages recorded per trace, all on the monotonic clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    RiskPassed,
    Submitted,
    Terminal,
}

#[derive(Clone, Copy, Debug)]
struct TraceTimes {
    ws_received: Instant,
    book_applied: Instant,
    detected: Instant,
    risk_passed: Option<Instant>,
    submitted: Option<Instant>,
    created: Instant,
}

/// Fan-in point for structured events plus per-trace latency buckets.
///
/// Emission never blocks the hot path: a full channel increments a dropped
/// counter and the record is lost, which the recorder surfaces at shutdown.
#[derive(Debug)]
pub struct TelemetryBus {
    tx: mpsc::Sender<EventRecord>,
    dropped: AtomicU64,
    traces: Mutex<HashMap<Uuid, TraceTimes>>,
}

impl TelemetryBus {
    pub fn new(tx: mpsc::Sender<EventRecord>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
            traces: Mutex::new(HashMap::new()),
        }
    }

    /// A bus that drops everything — for tests and tools that do not record.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx)
    }

    pub fn emit(&self, event_type: &'static str, trace_id: Option<Uuid>, data: serde_json::Value) {
        let record = EventRecord {
            event_type,
            ts: chrono::Utc::now().timestamp_millis(),
            trace_id,
            data,
        };
        if self.tx.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Open latency attribution for a trace. The first three stamps arrive
    /// together because the detector learns them from the triggering update.
    pub fn begin_trace(
        &self,
        trace_id: Uuid,
        ws_received: Instant,
        book_applied: Instant,
        detected: Instant,
    ) {
        self.traces.lock().insert(
            trace_id,
            TraceTimes {
                ws_received,
                book_applied,
                detected,
                risk_passed: None,
                submitted: None,
                created: Instant::now(),
            },
        );
    }

    /// Stamp a later stage. `Terminal` closes the trace and emits its
    /// latency buckets.
    pub fn stage(&self, trace_id: Uuid, stage: Stage, at: Instant) {
        let mut traces = self.traces.lock();
        match stage {
            Stage::RiskPassed => {
                if let Some(times) = traces.get_mut(&trace_id) {
                    times.risk_passed = Some(at);
                }
            }
            Stage::Submitted => {
                if let Some(times) = traces.get_mut(&trace_id) {
                    times.submitted = Some(at);
                }
            }
            Stage::Terminal => {
                if let Some(times) = traces.remove(&trace_id) {
                    drop(traces);
                    self.emit_latency(trace_id, &times, at);
                }
            }
        }
    }

    /// Drop traces that never reached a terminal stage (rejected before
    /// execution, coalesced away). Housekeeping calls this periodically.
    pub fn sweep_stale_traces(&self, max_age: Duration) {
        self.traces.lock().retain(|_, t| t.created.elapsed() < max_age);
    }

    fn emit_latency(&self, trace_id: Uuid, times: &TraceTimes, terminal: Instant) {
        let us = |a: Instant, b: Instant| b.saturating_duration_since(a).as_micros() as u64;
        let mut data = serde_json::json!({
            "ws_to_book_us": us(times.ws_received, times.book_applied),
            "book_to_signal_us": us(times.book_applied, times.detected),
            "end_to_end_us": us(times.ws_received, terminal),
        });
        if let Some(risk) = times.risk_passed {
            data["signal_to_risk_us"] = us(times.detected, risk).into();
            if let Some(sent) = times.submitted {
                data["risk_to_send_us"] = us(risk, sent).into();
            }
        }
        self.emit(TRACE_LATENCY, Some(trace_id), data);
    }
}
