use std::collections::BTreeSet;

use parking_lot::Mutex;

/// Monotonic nonce allocator for one wallet, seeded from the chain's
/// pending-nonce view. Allocation, confirmation and release are serialized
/// under a single mutex; a nonce is never handed out twice unless the prior
/// allocation was explicitly released.
///
/// Double-confirming or double-releasing a nonce is an invariant violation
/// and panics: it means two submissions shared one allocation.
pub struct NonceManager {
    inner: Mutex<Inner>,
}

struct Inner {
    next_nonce: u64,
    pending: BTreeSet<u64>,
    confirmed: BTreeSet<u64>,
    /// Released nonces below `next_nonce` that could not be reused safely;
    /// reclaimed wholesale on the next re-initialization from chain.
    gaps: BTreeSet<u64>,
}

impl NonceManager {
    /// Seed from the chain's pending nonce.
    pub fn new(chain_pending_nonce: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_nonce: chain_pending_nonce,
                pending: BTreeSet::new(),
                confirmed: BTreeSet::new(),
                gaps: BTreeSet::new(),
            }),
        }
    }

    /// Reserve the next nonce.
    pub fn allocate(&self) -> u64 {
        let mut inner = self.inner.lock();
        let nonce = inner.next_nonce;
        inner.next_nonce += 1;
        inner.pending.insert(nonce);
        nonce
    }

    /// The submission carrying this nonce landed on chain.
    pub fn mark_confirmed(&self, nonce: u64) {
        let mut inner = self.inner.lock();
        assert!(
            inner.pending.remove(&nonce),
            "nonce {nonce} confirmed but was not pending"
        );
        inner.confirmed.insert(nonce);
    }

    /// The submission failed without reaching the chain; hand the nonce
    /// back. When it is the highest allocation it is reused directly, else
    /// it becomes a gap reclaimed at the next re-initialization.
    pub fn release(&self, nonce: u64) {
        let mut inner = self.inner.lock();
        assert!(
            inner.pending.remove(&nonce),
            "nonce {nonce} released but was not pending"
        );
        if nonce + 1 == inner.next_nonce {
            inner.next_nonce = nonce;
            // Contiguous gaps directly below also become reusable.
            while let Some(&gap) = inner.gaps.last() {
                if gap + 1 == inner.next_nonce {
                    inner.gaps.remove(&gap);
                    inner.next_nonce = gap;
                } else {
                    break;
                }
            }
        } else {
            inner.gaps.insert(nonce);
        }
    }

    /// Crash/restart path: the chain is the source of truth. Forgets local
    /// gaps and pending state in favor of the reported pending nonce.
    pub fn reinitialize(&self, chain_pending_nonce: u64) {
        let mut inner = self.inner.lock();
        inner.next_nonce = chain_pending_nonce;
        inner.pending.clear();
        inner.gaps.clear();
    }

    pub fn next_nonce(&self) -> u64 {
        self.inner.lock().next_nonce
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.inner.lock().confirmed.len()
    }
}
