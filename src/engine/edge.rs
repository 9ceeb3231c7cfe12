use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::Config;
use crate::gateway::chain::GasEstimate;
use crate::gateway::oracle::PriceOracle;
use crate::types::{ArbitrageOpportunity, EdgeBreakdown, EdgeDecision, EdgeReject};

const BPS: Decimal = dec!(0.0001);

/// Gross → net edge accounting. All terms in USDC; `net_edge` is the exact
/// decimal difference, so the breakdown can be audited line by line from the
/// event log.
pub struct EdgeCalculator {
    fee_rate: Decimal,
    slippage_bps: Decimal,
    latency_bps: Decimal,
    latency_cap: Decimal,
    max_gas_cost: Decimal,
    abs_floor: Decimal,
    min_profit_pct: Decimal,
    oracle: Arc<dyn PriceOracle>,
}

impl EdgeCalculator {
    pub fn new(config: &Config, oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            fee_rate: config.fee_rate,
            slippage_bps: config.max_slippage_bps,
            latency_bps: config.latency_buffer_bps,
            latency_cap: config.latency_buffer_cap,
            max_gas_cost: config.max_gas_cost_usdc,
            abs_floor: config.min_profit_threshold_abs,
            min_profit_pct: config.min_profit_threshold_pct,
            oracle,
        }
    }

    /// Two-leg gas cost in USDC at the current estimate and MATIC price.
    pub fn gas_cost_usdc(&self, gas: &GasEstimate) -> Decimal {
        gas.cost_matic() * dec!(2) * self.oracle.matic_usd()
    }

    pub fn evaluate(&self, opp: &ArbitrageOpportunity, gas: &GasEstimate) -> EdgeBreakdown {
        let qty = opp.qty;
        let vwap_sum = opp.yes_vwap + opp.no_vwap;

        let gross_edge = opp.expected_profit_per_unit * qty;
        let fees_est = vwap_sum * qty * self.fee_rate;
        let slippage_est = qty * vwap_sum * self.slippage_bps * BPS;
        let gas_est = self.gas_cost_usdc(gas);

        let mut risk_tags = Vec::new();
        let raw_latency = qty * self.latency_bps * BPS;
        let latency_buffer = if raw_latency > self.latency_cap {
            risk_tags.push("latency_capped");
            self.latency_cap
        } else {
            raw_latency
        };

        let net_edge = gross_edge - (fees_est + slippage_est + gas_est + latency_buffer);
        let min_threshold = self.abs_floor.max(qty * self.min_profit_pct);

        // Reject attribution, most specific first: a hard gas cap, a
        // slippage estimate that alone eats the gross, an outright negative
        // net, a latency buffer that was the deciding cost, and finally the
        // plain threshold miss.
        let reject_reason = if net_edge >= min_threshold {
            None
        } else if gas_est > self.max_gas_cost {
            Some(EdgeReject::GasTooHigh)
        } else if slippage_est >= gross_edge {
            Some(EdgeReject::SlippageTooHigh)
        } else if net_edge < Decimal::ZERO {
            Some(EdgeReject::NegativeNetEdge)
        } else if net_edge + latency_buffer >= min_threshold {
            Some(EdgeReject::LatencyBufferDominates)
        } else {
            Some(EdgeReject::ProfitTooLow)
        };

        let decision = if reject_reason.is_none() {
            EdgeDecision::Accept
        } else {
            EdgeDecision::Reject
        };

        EdgeBreakdown {
            gross_edge,
            fees_est,
            slippage_est,
            gas_est,
            latency_buffer,
            net_edge,
            min_threshold,
            decision,
            reject_reason,
            risk_tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::oracle::StaticOracle;
    use crate::types::MarketPair;
    use std::time::Instant;
    use uuid::Uuid;

    fn make_opp(yes_vwap: Decimal, no_vwap: Decimal, qty: Decimal) -> ArbitrageOpportunity {
        let pair = Arc::new(MarketPair {
            market_id: "mkt-1".into(),
            yes_token_id: Arc::from("tok-yes"),
            no_token_id: Arc::from("tok-no"),
            question: "Will it settle?".into(),
            end_date: chrono::Utc::now(),
        });
        let per_unit = Decimal::ONE - (yes_vwap + no_vwap);
        ArbitrageOpportunity {
            pair,
            yes_vwap,
            no_vwap,
            yes_qty: qty,
            no_qty: qty,
            qty,
            trade_size_usdc: (yes_vwap + no_vwap) * qty,
            expected_profit_per_unit: per_unit,
            expected_profit_total: per_unit * qty,
            detected_at: Instant::now(),
            detected_ts: chrono::Utc::now(),
            trace_id: Uuid::new_v4(),
        }
    }

    fn make_calc(config: &Config, matic_usd: Decimal) -> EdgeCalculator {
        EdgeCalculator::new(config, Arc::new(StaticOracle(matic_usd)))
    }

    fn no_gas() -> GasEstimate {
        GasEstimate {
            base_fee_gwei: Decimal::ZERO,
            priority_fee_gwei: Decimal::ZERO,
            gas_limit: 0,
        }
    }

    fn base_config() -> Config {
        let mut config = Config::from_env();
        config.fee_rate = dec!(0.0035);
        config.max_slippage_bps = dec!(5);
        config.latency_buffer_bps = dec!(2);
        config.latency_buffer_cap = dec!(0.05);
        config.min_profit_threshold_abs = dec!(0.01);
        config.min_profit_threshold_pct = dec!(0.005);
        config.max_gas_cost_usdc = dec!(0.50);
        config
    }

    /// Scenario 1 economics: YES at 0.45, NO at 0.50, qty 10, default fees.
    /// Expected: ACCEPT with the exact decimal breakdown (P4).
    #[test]
    fn test_clear_edge_accepts() {
        let calc = make_calc(&base_config(), dec!(0.50));
        let opp = make_opp(dec!(0.45), dec!(0.50), dec!(10));
        let edge = calc.evaluate(&opp, &no_gas());

        assert_eq!(edge.gross_edge, dec!(0.50));
        assert_eq!(edge.fees_est, dec!(0.03325)); // 9.5 * 0.0035
        assert_eq!(edge.slippage_est, dec!(0.00475)); // 9.5 * 5bps
        assert_eq!(edge.gas_est, Decimal::ZERO);
        assert_eq!(edge.latency_buffer, dec!(0.002)); // 10 * 2bps
        assert_eq!(
            edge.net_edge,
            edge.gross_edge
                - (edge.fees_est + edge.slippage_est + edge.gas_est + edge.latency_buffer)
        );
        assert_eq!(edge.net_edge, dec!(0.46));
        assert_eq!(edge.min_threshold, dec!(0.05));
        assert_eq!(edge.decision, EdgeDecision::Accept);
        assert!(edge.reject_reason.is_none());
    }

    /// Scenario 2: fee rate cranked to 3% with a small quantity. Net stays
    /// positive but under the absolute floor.
    /// Expected: REJECT with PROFIT_TOO_LOW.
    #[test]
    fn test_fee_domination_rejects_profit_too_low() {
        let mut config = base_config();
        config.fee_rate = dec!(0.03);
        let calc = make_calc(&config, dec!(0.50));
        let opp = make_opp(dec!(0.45), dec!(0.50), dec!(0.4));
        let edge = calc.evaluate(&opp, &no_gas());

        // gross = 0.05 * 0.4 = 0.02; fees = 0.95 * 0.4 * 0.03 = 0.0114
        assert!(edge.net_edge > Decimal::ZERO);
        assert!(edge.net_edge < edge.min_threshold);
        assert_eq!(edge.decision, EdgeDecision::Reject);
        assert_eq!(edge.reject_reason, Some(EdgeReject::ProfitTooLow));
    }

    /// Gas above the configured USDC cap rejects regardless of edge.
    #[test]
    fn test_gas_cap_rejects() {
        let calc = make_calc(&base_config(), dec!(0.50));
        let opp = make_opp(dec!(0.45), dec!(0.50), dec!(10));
        // 500 gwei * 10M gas = 5 MATIC per leg; * 2 legs * $0.50 = $5.
        let gas = GasEstimate {
            base_fee_gwei: dec!(500),
            priority_fee_gwei: Decimal::ZERO,
            gas_limit: 10_000_000,
        };
        let edge = calc.evaluate(&opp, &gas);
        assert_eq!(edge.gas_est, dec!(5.00));
        assert_eq!(edge.reject_reason, Some(EdgeReject::GasTooHigh));
    }

    /// A hair of gross edge with the default slippage estimate larger than
    /// it rejects as SLIPPAGE_TOO_HIGH, not as a generic threshold miss.
    #[test]
    fn test_slippage_domination() {
        let mut config = base_config();
        config.fee_rate = Decimal::ZERO;
        config.max_slippage_bps = dec!(100); // 1%
        let calc = make_calc(&config, dec!(0.50));
        // gross per unit = 1 - 0.999 = 0.001; slippage = 0.999 * 1% ≈ 0.01
        let opp = make_opp(dec!(0.499), dec!(0.50), dec!(10));
        let edge = calc.evaluate(&opp, &no_gas());
        assert!(edge.slippage_est >= edge.gross_edge);
        assert_eq!(edge.reject_reason, Some(EdgeReject::SlippageTooHigh));
    }

    /// Net goes negative once every cost lands: NEGATIVE_NET_EDGE.
    #[test]
    fn test_negative_net_edge() {
        let mut config = base_config();
        config.fee_rate = dec!(0.06); // 0.95*0.06 = 0.057 per unit > 0.05 gross
        let calc = make_calc(&config, dec!(0.50));
        let opp = make_opp(dec!(0.45), dec!(0.50), dec!(10));
        let edge = calc.evaluate(&opp, &no_gas());
        assert!(edge.net_edge < Decimal::ZERO);
        assert_eq!(edge.reject_reason, Some(EdgeReject::NegativeNetEdge));
    }

    /// The breakdown passes without the latency buffer and fails with it:
    /// LATENCY_BUFFER_DOMINATES.
    #[test]
    fn test_latency_buffer_dominates() {
        let mut config = base_config();
        config.fee_rate = Decimal::ZERO;
        config.max_slippage_bps = Decimal::ZERO;
        config.latency_buffer_bps = dec!(40);
        config.latency_buffer_cap = dec!(1.0);
        config.min_profit_threshold_abs = dec!(0.05);
        let calc = make_calc(&config, dec!(0.50));
        // gross = 0.006 * 10 = 0.06; latency = 10 * 40bps = 0.04
        let opp = make_opp(dec!(0.496), dec!(0.498), dec!(10));
        let edge = calc.evaluate(&opp, &no_gas());
        assert!(edge.net_edge < edge.min_threshold);
        assert!(edge.net_edge + edge.latency_buffer >= edge.min_threshold);
        assert_eq!(edge.reject_reason, Some(EdgeReject::LatencyBufferDominates));
    }

    /// The latency buffer is capped and the cap is tagged.
    #[test]
    fn test_latency_cap_applies() {
        let mut config = base_config();
        config.latency_buffer_bps = dec!(100);
        config.latency_buffer_cap = dec!(0.03);
        let calc = make_calc(&config, dec!(0.50));
        let opp = make_opp(dec!(0.45), dec!(0.50), dec!(10)); // raw buffer 0.1
        let edge = calc.evaluate(&opp, &no_gas());
        assert_eq!(edge.latency_buffer, dec!(0.03));
        assert!(edge.risk_tags.contains(&"latency_capped"));
    }

    /// P10: whenever the calculator accepts, the gross edge is positive and
    /// net clears the threshold.
    #[test]
    fn test_accept_implies_no_loss() {
        let calc = make_calc(&base_config(), dec!(0.50));
        for (yes, no, qty) in [
            (dec!(0.45), dec!(0.50), dec!(10)),
            (dec!(0.30), dec!(0.30), dec!(3)),
            (dec!(0.499), dec!(0.499), dec!(100)),
            (dec!(0.40), dec!(0.58), dec!(0.5)),
        ] {
            let edge = calc.evaluate(&make_opp(yes, no, qty), &no_gas());
            if edge.decision == EdgeDecision::Accept {
                assert!(edge.gross_edge > Decimal::ZERO);
                assert!(edge.net_edge >= edge.min_threshold);
            }
        }
    }
}
