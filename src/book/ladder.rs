use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::{OrderLevel, Side};

/// Share quantities are settled to 6 decimal places; always round down so a
/// walk never claims more than the ladder holds.
pub const QTY_DP: u32 = 6;

pub fn floor_qty(qty: Decimal) -> Decimal {
    qty.round_dp_with_strategy(QTY_DP, RoundingStrategy::ToZero)
}

/// One price/size change from a delta message.
#[derive(Clone, Debug)]
pub struct LevelUpdate {
    pub side: Side,
    pub price: Decimal,
    /// Zero removes the level.
    pub size: Decimal,
}

/// Result of walking one side of the book for a USDC budget.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WalkOutcome {
    /// Shares acquired, rounded down to 6 dp.
    pub qty: Decimal,
    /// USDC actually spent (qty-weighted, after rounding).
    pub spent: Decimal,
    /// spent / qty.
    pub vwap: Decimal,
    /// True when the ladder exhausted before the budget was consumed.
    pub partial: bool,
}

/// Walk an ascending ask ladder with a USDC budget.
///
/// At each level the full notional `price * size` is taken while it fits the
/// remaining budget; the final level is consumed fractionally at
/// `remaining / price`. Returns `None` on an empty ladder or non-positive
/// budget.
pub fn walk_asks(asks: &[OrderLevel], budget: Decimal) -> Option<WalkOutcome> {
    if asks.is_empty() || budget <= Decimal::ZERO {
        return None;
    }

    let mut remaining = budget;
    let mut qty = Decimal::ZERO;
    let mut spent = Decimal::ZERO;

    for level in asks {
        if level.size <= Decimal::ZERO {
            continue;
        }
        let value = level.value();
        if value >= remaining {
            let take = floor_qty(remaining / level.price);
            qty += take;
            spent += take * level.price;
            remaining = Decimal::ZERO;
            break;
        }
        qty += level.size;
        spent += value;
        remaining -= value;
    }

    if qty <= Decimal::ZERO {
        return None;
    }

    Some(WalkOutcome {
        qty,
        spent,
        vwap: spent / qty,
        partial: remaining > Decimal::ZERO,
    })
}

/// Depth ladder for one token: bids descending, asks ascending, both capped.
/// Price ties are impossible by construction (one level per price); equal
/// prices from updates replace in place, preserving insertion order.
#[derive(Clone, Debug)]
pub struct OrderBook {
    pub bids: Vec<OrderLevel>,
    pub asks: Vec<OrderLevel>,
    pub last_update_seq: u64,
    pub last_update_ts: DateTime<Utc>,
    depth_cap: usize,
}

impl OrderBook {
    pub fn new(depth_cap: usize) -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            last_update_seq: 0,
            last_update_ts: Utc::now(),
            depth_cap,
        }
    }

    pub fn best_bid(&self) -> Option<OrderLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<OrderLevel> {
        self.asks.first().copied()
    }

    /// Shares resting across both sides — the anomaly guard's depth measure.
    pub fn total_depth(&self) -> Decimal {
        self.bids.iter().chain(self.asks.iter()).map(|l| l.size).sum()
    }

    /// Replace the whole book from a snapshot. Zero-size levels are dropped,
    /// sides are sorted, depth is capped, and crossing bids are discarded so
    /// best_bid < best_ask always holds afterward.
    pub fn apply_snapshot(
        &mut self,
        bids: Vec<OrderLevel>,
        asks: Vec<OrderLevel>,
        seq: u64,
        ts: DateTime<Utc>,
    ) {
        self.asks = asks;
        self.asks.retain(|l| l.size > Decimal::ZERO && l.price > Decimal::ZERO);
        self.asks.sort_by(|a, b| a.price.cmp(&b.price));
        self.asks.truncate(self.depth_cap);

        self.bids = bids;
        self.bids.retain(|l| l.size > Decimal::ZERO && l.price > Decimal::ZERO);
        self.bids.sort_by(|a, b| b.price.cmp(&a.price));
        if let Some(best_ask) = self.asks.first().map(|l| l.price) {
            self.bids.retain(|l| l.price < best_ask);
        }
        self.bids.truncate(self.depth_cap);

        self.last_update_seq = seq;
        self.last_update_ts = ts;
    }

    /// Apply one delta's level updates. A crossing insert is dropped rather
    /// than applied, keeping the book uncrossed for readers.
    pub fn apply_delta(&mut self, updates: &[LevelUpdate], seq: u64, ts: DateTime<Utc>) {
        for update in updates {
            match update.side {
                // BUY-side liquidity lives in bids, SELL-side in asks.
                Side::Buy => {
                    if update.size > Decimal::ZERO {
                        if let Some(best_ask) = self.asks.first().map(|l| l.price) {
                            if update.price >= best_ask {
                                continue;
                            }
                        }
                    }
                    upsert_descending(&mut self.bids, update, self.depth_cap);
                }
                Side::Sell => {
                    if update.size > Decimal::ZERO {
                        if let Some(best_bid) = self.bids.first().map(|l| l.price) {
                            if update.price <= best_bid {
                                continue;
                            }
                        }
                    }
                    upsert_ascending(&mut self.asks, update, self.depth_cap);
                }
            }
        }
        self.last_update_seq = seq;
        self.last_update_ts = ts;
    }

    pub fn walk_asks(&self, budget: Decimal) -> Option<WalkOutcome> {
        walk_asks(&self.asks, budget)
    }
}

fn upsert_descending(levels: &mut Vec<OrderLevel>, update: &LevelUpdate, cap: usize) {
    upsert(levels, update, cap, |a, b| b.cmp(a))
}

fn upsert_ascending(levels: &mut Vec<OrderLevel>, update: &LevelUpdate, cap: usize) {
    upsert(levels, update, cap, |a, b| a.cmp(b))
}

fn upsert(
    levels: &mut Vec<OrderLevel>,
    update: &LevelUpdate,
    cap: usize,
    ord: impl Fn(&Decimal, &Decimal) -> std::cmp::Ordering,
) {
    match levels.binary_search_by(|l| ord(&l.price, &update.price)) {
        Ok(i) => {
            if update.size <= Decimal::ZERO {
                levels.remove(i);
            } else {
                levels[i].size = update.size;
            }
        }
        Err(i) => {
            if update.size > Decimal::ZERO {
                levels.insert(i, OrderLevel::new(update.price, update.size));
                levels.truncate(cap);
            }
        }
    }
}

/// Ladder invariants: strict ordering on both sides and an uncrossed top.
/// A violation here is a programming error in the apply path, so it halts.
pub fn assert_ladder_invariants(book: &OrderBook) {
    for w in book.bids.windows(2) {
        assert!(w[0].price > w[1].price, "bid ladder not strictly descending");
    }
    for w in book.asks.windows(2) {
        assert!(w[0].price < w[1].price, "ask ladder not strictly ascending");
    }
    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        assert!(bid.price < ask.price, "book crossed: bid {} >= ask {}", bid.price, ask.price);
    }
}
