use std::collections::{HashMap, VecDeque};

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::config::AnomalyConfig;
use crate::types::RiskReject;

#[derive(Clone, Copy, Debug)]
struct Sample {
    ts_ms: i64,
    yes_mid: Decimal,
    no_mid: Decimal,
    depth: Decimal,
}

/// What the guard concluded about a pair's recent window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnomalyAssessment {
    /// 0.0 = quiet. Crossing a threshold maps to 0.5; 40% past it to 0.7.
    pub severity: f64,
    /// Dominant cause when severity is actionable.
    pub kind: Option<RiskReject>,
}

impl AnomalyAssessment {
    pub const QUIET: Self = Self { severity: 0.0, kind: None };
}

/// Per-pair sliding windows over mid prices and depth, watching for the
/// three market-integrity failure shapes: price pulses, depth rugs, and
/// YES/NO decoupling.
pub struct AnomalyGuard {
    pulse_threshold: Decimal,
    depth_threshold: Decimal,
    correlation_threshold: Decimal,
    window_ms: i64,
    windows: HashMap<String, VecDeque<Sample>>,
}

impl AnomalyGuard {
    pub fn new(config: &AnomalyConfig) -> Self {
        Self {
            pulse_threshold: Decimal::from_f64(config.pulse_threshold).unwrap_or(Decimal::ONE),
            depth_threshold: Decimal::from_f64(config.depth_threshold).unwrap_or(Decimal::ONE),
            correlation_threshold: Decimal::from_f64(config.correlation_threshold)
                .unwrap_or(Decimal::ONE),
            window_ms: config.window.as_millis() as i64,
            windows: HashMap::new(),
        }
    }

    /// Record one observation of a pair's top of book.
    pub fn observe(
        &mut self,
        market_id: &str,
        yes_mid: Decimal,
        no_mid: Decimal,
        depth: Decimal,
        now_ms: i64,
    ) {
        let window = self.windows.entry(market_id.to_string()).or_default();
        window.push_back(Sample { ts_ms: now_ms, yes_mid, no_mid, depth });
        let cutoff = now_ms - self.window_ms;
        while window.front().map_or(false, |s| s.ts_ms < cutoff) {
            window.pop_front();
        }
    }

    /// Drop windows that have gone silent (housekeeping).
    pub fn evict_idle(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        self.windows.retain(|_, w| w.back().map_or(false, |s| s.ts_ms >= cutoff));
    }

    /// Judge the pair's current window. With fewer than two samples there is
    /// nothing to compare and the pair reads quiet.
    pub fn assess(&self, market_id: &str) -> AnomalyAssessment {
        let Some(window) = self.windows.get(market_id) else {
            return AnomalyAssessment::QUIET;
        };
        let (Some(first), Some(last)) = (window.front(), window.back()) else {
            return AnomalyAssessment::QUIET;
        };
        if window.len() < 2 {
            return AnomalyAssessment::QUIET;
        }

        // Price pulse: the larger of the two legs' fractional moves.
        let pulse = ratio_move(first.yes_mid, last.yes_mid)
            .max(ratio_move(first.no_mid, last.no_mid));

        // Depth rug: fractional drop from the window's maximum depth.
        let max_depth = window.iter().map(|s| s.depth).max().unwrap_or(Decimal::ZERO);
        let depth_drop = if max_depth > Decimal::ZERO {
            ((max_depth - last.depth) / max_depth).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        // Decoupling: yes+no mids should track a constant sum; measure the
        // latest sum's divergence from the window mean.
        let n = Decimal::from(window.len() as u64);
        let mean_sum: Decimal =
            window.iter().map(|s| s.yes_mid + s.no_mid).sum::<Decimal>() / n;
        let divergence = ((last.yes_mid + last.no_mid) - mean_sum).abs();

        let pulse_sev = severity_of(pulse, self.pulse_threshold);
        let depth_sev = severity_of(depth_drop, self.depth_threshold);
        let corr_sev = severity_of(divergence, self.correlation_threshold);

        let severity = pulse_sev.max(depth_sev).max(corr_sev);
        let kind = if severity < super::risk::ANOMALY_DEGRADE_SEVERITY {
            None
        } else if depth_sev >= pulse_sev && depth_sev >= corr_sev {
            Some(RiskReject::ManipulationRisk)
        } else {
            Some(RiskReject::AbnormalVolatility)
        };

        AnomalyAssessment { severity, kind }
    }
}

fn ratio_move(from: Decimal, to: Decimal) -> Decimal {
    if from <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((to - from) / from).abs()
}

/// Map a measure against its threshold into [0, 1]: at the threshold the
/// severity is 0.5, at 1.4x it is 0.7, saturating at 1.0.
fn severity_of(measure: Decimal, threshold: Decimal) -> f64 {
    if threshold <= Decimal::ZERO {
        return 0.0;
    }
    // Scale in decimal so threshold crossings land exactly on 0.5/0.7 before
    // the one conversion to f64.
    let severity = (measure / threshold) * rust_decimal_macros::dec!(0.5);
    severity
        .max(Decimal::ZERO)
        .min(Decimal::ONE)
        .to_f64()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::risk::{ANOMALY_BLOCK_SEVERITY, ANOMALY_DEGRADE_SEVERITY};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn make_guard() -> AnomalyGuard {
        AnomalyGuard::new(&AnomalyConfig {
            pulse_threshold: 0.10,
            depth_threshold: 0.50,
            correlation_threshold: 0.05,
            window: Duration::from_secs(30),
        })
    }

    /// A flat window reads quiet.
    #[test]
    fn test_quiet_window() {
        let mut guard = make_guard();
        for i in 0..5 {
            guard.observe("mkt-1", dec!(0.45), dec!(0.50), dec!(1000), i * 1_000);
        }
        let a = guard.assess("mkt-1");
        assert_eq!(a.severity, 0.0);
        assert!(a.kind.is_none());
    }

    /// Unobserved pairs read quiet rather than erroring.
    #[test]
    fn test_unknown_pair_quiet() {
        let guard = make_guard();
        assert_eq!(guard.assess("nope"), AnomalyAssessment::QUIET);
    }

    /// Scenario: YES mid jumps 14% within the window (threshold 10%).
    /// Expected: severity 0.7 — enough to trip the breaker — attributed to
    /// volatility.
    #[test]
    fn test_price_pulse_trips() {
        let mut guard = make_guard();
        guard.observe("mkt-1", dec!(0.50), dec!(0.48), dec!(1000), 0);
        guard.observe("mkt-1", dec!(0.57), dec!(0.48), dec!(1000), 1_000);
        let a = guard.assess("mkt-1");
        assert!(a.severity >= ANOMALY_BLOCK_SEVERITY, "severity {}", a.severity);
        assert_eq!(a.kind, Some(RiskReject::AbnormalVolatility));
    }

    /// Scenario: depth collapses from 1000 to 300 (70% > 50% threshold).
    /// Expected: degrade-level severity attributed to manipulation.
    #[test]
    fn test_depth_rug_flags_manipulation() {
        let mut guard = make_guard();
        guard.observe("mkt-1", dec!(0.45), dec!(0.50), dec!(1000), 0);
        guard.observe("mkt-1", dec!(0.45), dec!(0.50), dec!(300), 1_000);
        let a = guard.assess("mkt-1");
        assert!(a.severity >= ANOMALY_DEGRADE_SEVERITY);
        assert!(a.severity >= 0.69, "70% drop over a 50% threshold → 0.7");
        assert_eq!(a.kind, Some(RiskReject::ManipulationRisk));
    }

    /// Scenario: yes+no sum drifts from ~0.95 to 1.03 (divergence 0.053 vs
    /// mean, threshold 0.05).
    /// Expected: actionable severity, volatility kind.
    #[test]
    fn test_decoupling_flags() {
        let mut guard = make_guard();
        guard.observe("mkt-1", dec!(0.45), dec!(0.50), dec!(1000), 0);
        guard.observe("mkt-1", dec!(0.45), dec!(0.50), dec!(1000), 500);
        guard.observe("mkt-1", dec!(0.53), dec!(0.50), dec!(1000), 1_000);
        let a = guard.assess("mkt-1");
        assert!(a.severity >= ANOMALY_DEGRADE_SEVERITY, "severity {}", a.severity);
    }

    /// Samples age out of the window, and idle pairs evict entirely.
    #[test]
    fn test_window_eviction() {
        let mut guard = make_guard();
        guard.observe("mkt-1", dec!(0.50), dec!(0.48), dec!(1000), 0);
        // 31s later the pulse baseline is gone; a single fresh sample is quiet.
        guard.observe("mkt-1", dec!(0.57), dec!(0.48), dec!(1000), 31_000);
        assert_eq!(guard.assess("mkt-1").severity, 0.0);

        guard.evict_idle(100_000);
        assert_eq!(guard.assess("mkt-1"), AnomalyAssessment::QUIET);
        assert!(guard.windows.is_empty());
    }
}
