use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::book::{floor_qty, OrderBookStore};
use crate::config::Config;
use crate::types::{ArbitrageOpportunity, MarketPair, TokenId};

/// Walks both ask ladders of a pair on every top-of-book change and emits a
/// candidate whenever 1 YES + 1 NO can be bought for less than 1 USDC.
/// Stateless between invocations; all book state lives in the store.
pub struct Detector {
    store: Arc<OrderBookStore>,
    pairs: Vec<Arc<MarketPair>>,
    /// token index (subscription order) → indices into `pairs`.
    token_pairs: HashMap<usize, Vec<usize>>,
    per_leg_budget: Decimal,
    prefilter_floor: Decimal,
}

impl Detector {
    pub fn new(
        store: Arc<OrderBookStore>,
        pairs: Vec<Arc<MarketPair>>,
        tokens: &[TokenId],
        config: &Config,
    ) -> Self {
        let mut token_pairs: HashMap<usize, Vec<usize>> = HashMap::new();
        for (token_index, token) in tokens.iter().enumerate() {
            for (pair_index, pair) in pairs.iter().enumerate() {
                if pair.leg_of(token).is_some() {
                    token_pairs.entry(token_index).or_default().push(pair_index);
                }
            }
        }
        Self {
            store,
            pairs,
            token_pairs,
            per_leg_budget: config.per_leg_budget(),
            prefilter_floor: config.prefilter_floor,
        }
    }

    pub fn pair(&self, index: usize) -> &Arc<MarketPair> {
        &self.pairs[index]
    }

    /// Run detection for every pair a token belongs to.
    pub fn on_token_update(&self, token_index: usize) -> Vec<ArbitrageOpportunity> {
        let Some(pair_indices) = self.token_pairs.get(&token_index) else {
            return Vec::new();
        };
        pair_indices
            .iter()
            .filter_map(|&i| self.detect_pair(&self.pairs[i]))
            .collect()
    }

    /// One pair's detection pass. Empty or unregistered legs skip silently;
    /// a thin leg sizes the trade down to the minimum achievable quantity.
    pub fn detect_pair(&self, pair: &Arc<MarketPair>) -> Option<ArbitrageOpportunity> {
        let yes = self.store.walk_asks_partial(&pair.yes_token_id, self.per_leg_budget).ok()?;
        let no = self.store.walk_asks_partial(&pair.no_token_id, self.per_leg_budget).ok()?;

        let gross_per_unit = Decimal::ONE - (yes.vwap + no.vwap);
        if gross_per_unit <= Decimal::ZERO {
            return None;
        }

        let qty = floor_qty(yes.qty.min(no.qty));
        if qty <= Decimal::ZERO {
            return None;
        }

        let expected_profit_total = gross_per_unit * qty;
        if expected_profit_total < self.prefilter_floor {
            return None;
        }

        Some(ArbitrageOpportunity {
            pair: pair.clone(),
            yes_vwap: yes.vwap,
            no_vwap: no.vwap,
            yes_qty: yes.qty,
            no_qty: no.qty,
            qty,
            trade_size_usdc: self.per_leg_budget * Decimal::from(2u32),
            expected_profit_per_unit: gross_per_unit,
            expected_profit_total,
            detected_at: Instant::now(),
            detected_ts: chrono::Utc::now(),
            trace_id: Uuid::new_v4(),
        })
    }
}
