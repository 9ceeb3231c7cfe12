use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::types::{Fill, Leg};

const BPS: Decimal = dec!(0.0001);

#[derive(Clone, Debug, Default)]
struct OpenPair {
    expected_edge: Decimal,
    yes: Option<Fill>,
    no: Option<Fill>,
}

/// A completed YES+NO atomic pair with its realized (pre-resolution proxy)
/// PnL: holding both legs is worth exactly qty at settlement, so
/// `realized = qty - cost`.
#[derive(Clone, Debug)]
pub struct PairPnl {
    pub trace_id: Uuid,
    pub qty: Decimal,
    pub cost: Decimal,
    pub realized: Decimal,
    /// Edge the detector expected when the signal was admitted.
    pub expected: Decimal,
    pub is_simulated: bool,
}

/// Consumes fills, matches them into atomic pairs by trace id, and keeps the
/// rolling PnL totals. Proxy PnL is recognized when the pair completes; the
/// `settled_*` counters move at the market's resolution event.
pub struct PnlTracker {
    open: HashMap<Uuid, OpenPair>,
    completed: HashMap<Uuid, PairPnl>,

    pub cumulative_expected_edge: Decimal,
    pub cumulative_simulated_pnl: Decimal,
    pub cumulative_realized_pnl: Decimal,
    pub settled_pnl: Decimal,
    pub settled_qty: Decimal,

    equity_peak: Decimal,
    pub max_drawdown: Decimal,
}

impl PnlTracker {
    pub fn new() -> Self {
        Self {
            open: HashMap::new(),
            completed: HashMap::new(),
            cumulative_expected_edge: Decimal::ZERO,
            cumulative_simulated_pnl: Decimal::ZERO,
            cumulative_realized_pnl: Decimal::ZERO,
            settled_pnl: Decimal::ZERO,
            settled_qty: Decimal::ZERO,
            equity_peak: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
        }
    }

    /// Expected edge is booked when the signal is admitted, so expectation
    /// vs. outcome can be compared per trace and in aggregate.
    pub fn on_expected(&mut self, trace_id: Uuid, expected_total: Decimal) {
        self.cumulative_expected_edge += expected_total;
        self.open.entry(trace_id).or_default().expected_edge = expected_total;
    }

    /// Append one fill. Returns the pair PnL once both legs are present.
    pub fn on_fill(&mut self, leg: Leg, fill: Fill) -> Option<PairPnl> {
        let trace_id = fill.trace_id;
        let entry = self.open.entry(trace_id).or_default();
        match leg {
            Leg::Yes => entry.yes = Some(fill),
            Leg::No => entry.no = Some(fill),
        }
        let (Some(yes), Some(no)) = (entry.yes.as_ref(), entry.no.as_ref()) else {
            return None;
        };

        let qty = yes.quantity.min(no.quantity);
        let cost = yes.notional()
            + no.notional()
            + yes.fees_paid
            + no.fees_paid
            + slippage_cost(yes)
            + slippage_cost(no);
        let realized = qty - cost;
        let is_simulated = yes.is_simulated || no.is_simulated;
        let expected = entry.expected_edge;

        let pair = PairPnl { trace_id, qty, cost, realized, expected, is_simulated };
        self.open.remove(&trace_id);
        self.completed.insert(trace_id, pair.clone());

        if is_simulated {
            self.cumulative_simulated_pnl += realized;
        } else {
            self.cumulative_realized_pnl += realized;
        }
        self.update_drawdown();
        Some(pair)
    }

    /// A trace that will never pair up (abandoned or one-legged execution)
    /// is dropped from the open set; its exposure is the risk manager's
    /// problem, not a PnL pair.
    pub fn abandon(&mut self, trace_id: &Uuid) -> Option<Fill> {
        let entry = self.open.remove(trace_id)?;
        entry.yes.or(entry.no)
    }

    /// Resolution of the underlying market: the proxy PnL of the pair
    /// becomes final. Returns the reconciled pair.
    pub fn on_settlement(&mut self, trace_id: &Uuid) -> Option<PairPnl> {
        let pair = self.completed.remove(trace_id)?;
        self.settled_pnl += pair.realized;
        self.settled_qty += pair.qty;
        Some(pair)
    }

    /// Equity curve for drawdown tracking: both PnL streams combined.
    fn equity(&self) -> Decimal {
        self.cumulative_simulated_pnl + self.cumulative_realized_pnl
    }

    fn update_drawdown(&mut self) {
        let equity = self.equity();
        if equity > self.equity_peak {
            self.equity_peak = equity;
        }
        let drawdown = self.equity_peak - equity;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }
}

impl Default for PnlTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn slippage_cost(fill: &Fill) -> Decimal {
    fill.notional() * fill.slippage_bps * BPS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use std::sync::Arc;

    fn make_fill(
        trace_id: Uuid,
        token: &str,
        price: Decimal,
        qty: Decimal,
        fees: Decimal,
        simulated: bool,
    ) -> Fill {
        Fill {
            token_id: Arc::from(token),
            side: Side::Buy,
            quantity: qty,
            price_vwap: price,
            fees_paid: fees,
            slippage_bps: Decimal::ZERO,
            tx_hash: None,
            is_simulated: simulated,
            trace_id,
            ts: chrono::Utc::now(),
        }
    }

    /// P9: realized = qty - (notionals + fees + slippage), exactly.
    #[test]
    fn test_pair_pnl_identity() {
        let mut pnl = PnlTracker::new();
        let trace = Uuid::new_v4();
        pnl.on_expected(trace, dec!(0.50));

        let yes = make_fill(trace, "tok-yes", dec!(0.45), dec!(10), dec!(0.015750), true);
        let no = make_fill(trace, "tok-no", dec!(0.50), dec!(10), dec!(0.017500), true);
        assert!(pnl.on_fill(Leg::Yes, yes).is_none(), "one leg is not a pair");
        let pair = pnl.on_fill(Leg::No, no).expect("pair completes");

        // cost = 4.5 + 5.0 + 0.01575 + 0.0175 = 9.53325
        assert_eq!(pair.cost, dec!(9.533250));
        assert_eq!(pair.realized, dec!(10) - dec!(9.533250));
        assert!(pair.is_simulated);
        assert_eq!(pnl.cumulative_simulated_pnl, pair.realized);
        assert_eq!(pnl.cumulative_realized_pnl, Decimal::ZERO);
        assert_eq!(pnl.cumulative_expected_edge, dec!(0.50));
    }

    /// Slippage bps on the fill are part of the pair's cost.
    #[test]
    fn test_slippage_in_cost() {
        let mut pnl = PnlTracker::new();
        let trace = Uuid::new_v4();
        let mut yes = make_fill(trace, "tok-yes", dec!(0.45), dec!(10), Decimal::ZERO, false);
        let mut no = make_fill(trace, "tok-no", dec!(0.50), dec!(10), Decimal::ZERO, false);
        yes.slippage_bps = dec!(5);
        no.slippage_bps = dec!(5);
        pnl.on_fill(Leg::Yes, yes);
        let pair = pnl.on_fill(Leg::No, no).unwrap();
        // slippage = (4.5 + 5.0) * 5bps = 0.00475
        assert_eq!(pair.cost, dec!(9.5) + dec!(0.00475));
        assert!(!pair.is_simulated);
        assert_eq!(pnl.cumulative_realized_pnl, pair.realized);
    }

    /// Mismatched leg quantities settle at the smaller quantity.
    #[test]
    fn test_uneven_legs_use_min_qty() {
        let mut pnl = PnlTracker::new();
        let trace = Uuid::new_v4();
        pnl.on_fill(Leg::Yes, make_fill(trace, "y", dec!(0.45), dec!(11), Decimal::ZERO, true));
        let pair = pnl
            .on_fill(Leg::No, make_fill(trace, "n", dec!(0.50), dec!(10), Decimal::ZERO, true))
            .unwrap();
        assert_eq!(pair.qty, dec!(10));
    }

    /// Drawdown follows the combined equity curve peak-to-trough.
    #[test]
    fn test_max_drawdown() {
        let mut pnl = PnlTracker::new();

        // Win +0.5, then lose 0.3, then win 0.1: peak 0.5, trough 0.2.
        for (price_sum, _) in [(dec!(0.95), 0), (dec!(1.03), 1), (dec!(0.99), 2)] {
            let trace = Uuid::new_v4();
            let half = price_sum / dec!(2);
            pnl.on_fill(Leg::Yes, make_fill(trace, "y", half, dec!(10), Decimal::ZERO, false));
            pnl.on_fill(Leg::No, make_fill(trace, "n", half, dec!(10), Decimal::ZERO, false));
        }
        // PnLs: +0.5, -0.3, +0.1 → equity 0.5 → 0.2 → 0.3
        assert_eq!(pnl.cumulative_realized_pnl, dec!(0.3));
        assert_eq!(pnl.max_drawdown, dec!(0.3));
    }

    /// Settlement moves a completed pair's proxy PnL into the final
    /// counters exactly once.
    #[test]
    fn test_settlement_reconciles_once() {
        let mut pnl = PnlTracker::new();
        let trace = Uuid::new_v4();
        pnl.on_fill(Leg::Yes, make_fill(trace, "y", dec!(0.45), dec!(10), Decimal::ZERO, false));
        pnl.on_fill(Leg::No, make_fill(trace, "n", dec!(0.50), dec!(10), Decimal::ZERO, false));

        let settled = pnl.on_settlement(&trace).expect("settles");
        assert_eq!(settled.realized, dec!(0.5));
        assert_eq!(pnl.settled_pnl, dec!(0.5));
        assert_eq!(pnl.settled_qty, dec!(10));
        assert!(pnl.on_settlement(&trace).is_none(), "second settlement is a no-op");
        // Proxy counters are untouched by settlement.
        assert_eq!(pnl.cumulative_realized_pnl, dec!(0.5));
    }

    /// A partial execution abandons the trace and hands back the orphan leg.
    #[test]
    fn test_abandon_returns_orphan() {
        let mut pnl = PnlTracker::new();
        let trace = Uuid::new_v4();
        pnl.on_fill(Leg::Yes, make_fill(trace, "y", dec!(0.45), dec!(10), Decimal::ZERO, false));
        let orphan = pnl.abandon(&trace).expect("orphan leg");
        assert_eq!(orphan.token_id.as_ref(), "y");
        assert!(pnl.abandon(&trace).is_none());
    }
}
