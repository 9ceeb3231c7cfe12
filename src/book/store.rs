use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::book::ladder::{LevelUpdate, OrderBook, WalkOutcome};
use crate::types::{OrderLevel, TokenId};

/// Failures surfaced by book reads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookError {
    #[error("unknown token {0}")]
    UnknownToken(String),
    #[error("insufficient liquidity: achieved {achieved_qty} of the requested budget")]
    InsufficientLiquidity { achieved_qty: Decimal },
    #[error("empty side")]
    EmptySide,
}

/// Owner of all per-token books. The feed ingestor is the sole writer; the
/// detector reads owned snapshots, never live references, so a walk can
/// never observe a torn bid/ask pair.
pub struct OrderBookStore {
    depth_cap: usize,
    books: RwLock<HashMap<TokenId, Arc<RwLock<OrderBook>>>>,
}

impl OrderBookStore {
    pub fn new(depth_cap: usize) -> Self {
        Self {
            depth_cap,
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Intern a token and create its empty book. Returns the shared handle
    /// used as the canonical `TokenId` everywhere downstream.
    pub fn register_token(&self, token: &str) -> TokenId {
        let mut books = self.books.write();
        if let Some((existing, _)) = books.get_key_value(token) {
            return existing.clone();
        }
        let id: TokenId = Arc::from(token);
        books.insert(id.clone(), Arc::new(RwLock::new(OrderBook::new(self.depth_cap))));
        id
    }

    pub fn tokens(&self) -> Vec<TokenId> {
        self.books.read().keys().cloned().collect()
    }

    fn book(&self, token: &str) -> Result<Arc<RwLock<OrderBook>>, BookError> {
        self.books
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| BookError::UnknownToken(token.into()))
    }

    pub fn apply_snapshot(
        &self,
        token: &str,
        bids: Vec<OrderLevel>,
        asks: Vec<OrderLevel>,
        seq: u64,
        ts: DateTime<Utc>,
    ) -> Result<(), BookError> {
        let book = self.book(token)?;
        book.write().apply_snapshot(bids, asks, seq, ts);
        Ok(())
    }

    pub fn apply_delta(
        &self,
        token: &str,
        updates: &[LevelUpdate],
        seq: u64,
        ts: DateTime<Utc>,
    ) -> Result<(), BookError> {
        let book = self.book(token)?;
        book.write().apply_delta(updates, seq, ts);
        Ok(())
    }

    pub fn best_bid(&self, token: &str) -> Result<Option<OrderLevel>, BookError> {
        Ok(self.book(token)?.read().best_bid())
    }

    pub fn best_ask(&self, token: &str) -> Result<Option<OrderLevel>, BookError> {
        Ok(self.book(token)?.read().best_ask())
    }

    /// Last sequence number applied to a token's book.
    pub fn last_seq(&self, token: &str) -> Result<u64, BookError> {
        Ok(self.book(token)?.read().last_update_seq)
    }

    /// Owned copy of a token's book for lock-free reading.
    pub fn snapshot(&self, token: &str) -> Result<OrderBook, BookError> {
        Ok(self.book(token)?.read().clone())
    }

    /// VWAP-walk the ask side for a USDC budget. `InsufficientLiquidity`
    /// reports the quantity that was achievable when the ladder ran out.
    pub fn walk_asks(&self, token: &str, budget: Decimal) -> Result<WalkOutcome, BookError> {
        let book = self.book(token)?;
        let out = book.read().walk_asks(budget).ok_or(BookError::EmptySide)?;
        if out.partial {
            return Err(BookError::InsufficientLiquidity { achieved_qty: out.qty });
        }
        Ok(out)
    }

    /// Walk that tolerates partial fills — the detector sizes down to the
    /// achievable quantity instead of rejecting.
    pub fn walk_asks_partial(&self, token: &str, budget: Decimal) -> Result<WalkOutcome, BookError> {
        let book = self.book(token)?;
        let out = book.read().walk_asks(budget);
        out.ok_or(BookError::EmptySide)
    }
}
