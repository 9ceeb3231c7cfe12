use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::types::ExecutionOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdempotencyStatus {
    InFlight,
    DoneSuccess,
    DoneFailure,
}

#[derive(Clone, Debug)]
struct Entry {
    status: IdempotencyStatus,
    result: Option<ExecutionOutcome>,
    expires_at: Instant,
}

/// What `begin` decided about a submission key.
#[derive(Debug)]
pub enum Admission {
    /// First submission in this window — caller owns the key and must
    /// finalize it exactly once.
    Admitted,
    /// A submission with this key is in flight or already succeeded.
    /// Carries the cached result when one exists.
    Duplicate(Option<ExecutionOutcome>),
}

/// Fingerprint → result cache that collapses identical signals inside one
/// idempotency window to a single submission.
///
/// Keys move IN_FLIGHT → DONE_* exactly once; finalizing twice panics
/// (invariant violation). A DONE_FAILURE key may be retried by a later
/// submission; DONE_SUCCESS and IN_FLIGHT keys suppress duplicates.
pub struct IdempotencyRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl IdempotencyRegistry {
    /// `ttl` should cover one idempotency window plus grace.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn begin(&self, key: &str, now: Instant) -> Admission {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => match entry.status {
                IdempotencyStatus::InFlight => Admission::Duplicate(None),
                IdempotencyStatus::DoneSuccess => Admission::Duplicate(entry.result.clone()),
                // A failed window may be retried by a fresh signal.
                IdempotencyStatus::DoneFailure => {
                    entries.insert(
                        key.to_string(),
                        Entry {
                            status: IdempotencyStatus::InFlight,
                            result: None,
                            expires_at: now + self.ttl,
                        },
                    );
                    Admission::Admitted
                }
            },
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        status: IdempotencyStatus::InFlight,
                        result: None,
                        expires_at: now + self.ttl,
                    },
                );
                Admission::Admitted
            }
        }
    }

    /// Terminal transition for an admitted key.
    pub fn finalize(&self, key: &str, outcome: &ExecutionOutcome, now: Instant) {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(key)
            .unwrap_or_else(|| panic!("idempotency key {key} finalized but never began"));
        assert!(
            entry.status == IdempotencyStatus::InFlight,
            "idempotency key {key} finalized twice"
        );
        entry.status = if outcome.tx.success {
            IdempotencyStatus::DoneSuccess
        } else {
            IdempotencyStatus::DoneFailure
        };
        entry.result = Some(outcome.clone());
        entry.expires_at = now + self.ttl;
    }

    pub fn status(&self, key: &str) -> Option<IdempotencyStatus> {
        self.entries.lock().get(key).map(|e| e.status)
    }

    /// Housekeeping: drop expired entries. In-flight keys are never swept —
    /// their owner must finalize them first.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| {
            e.status == IdempotencyStatus::InFlight || e.expires_at > now
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
