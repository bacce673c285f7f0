//! Position-sizing strategies: five Kelly-family variants plus a fixed
//! fraction used by the sequential fold chain. Selected at call site via
//! enum dispatch — no inheritance hierarchy.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// `R = (TP − entry) / (entry − SL)`. Returns `None` if `entry − SL ≤ 0`
/// (the contract the Kelly family requires to be well-defined).
pub fn payoff_ratio(entry: Decimal, tp: Decimal, sl: Decimal) -> Option<Decimal> {
    let risk = entry - sl;
    if risk <= Decimal::ZERO {
        return None;
    }
    Some((tp - entry) / risk)
}

fn clamp01(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE)
}

/// `K(p, R) = clamp((R·p − (1−p)) / R, 0, 1)`. `R ≤ 0` is treated as
/// "no edge" and returns 0 rather than dividing.
pub fn pure_kelly(p: Decimal, r: Decimal) -> Decimal {
    if r <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    clamp01((r * p - (Decimal::ONE - p)) / r)
}

/// Caller-supplied percentage, bypassing the enum entirely. Used by the
/// sequential fold chain's fixed-fraction mode.
pub fn fixed_fraction(pct: Decimal) -> Decimal {
    clamp01(pct)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSizer {
    ConservativeKelly,
    EstimationRiskKelly,
    HalfKelly,
    Fixed100Percent,
    CurrentKellyTimesConfidence,
}

impl PositionSizer {
    /// Returns a position fraction in `[0, 1]`, or 0 when `entry − SL ≤ 0`.
    pub fn size(&self, entry: Decimal, tp: Decimal, sl: Decimal, p: Decimal, confidence: Decimal) -> Decimal {
        let Some(r) = payoff_ratio(entry, tp, sl) else {
            return Decimal::ZERO;
        };

        match self {
            PositionSizer::ConservativeKelly => {
                let shrunk_p = p * confidence + dec!(0.5) * (Decimal::ONE - confidence);
                pure_kelly(shrunk_p, r)
            }
            PositionSizer::EstimationRiskKelly => {
                let base = pure_kelly(p, r);
                let lambda = dec!(2);
                let n_eff = Decimal::ONE + (confidence / dec!(0.5)) * dec!(99);
                let discount = clamp01(Decimal::ONE - lambda * p * (Decimal::ONE - p) / n_eff);
                base * discount
            }
            PositionSizer::HalfKelly => dec!(0.5) * pure_kelly(p, r),
            PositionSizer::Fixed100Percent => Decimal::ONE,
            PositionSizer::CurrentKellyTimesConfidence => pure_kelly(p, r) * confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payoff_ratio_none_when_risk_non_positive() {
        assert_eq!(payoff_ratio(dec!(5000000), dec!(5150000), dec!(5000000)), None);
    }

    #[test]
    fn payoff_ratio_matches_s1_scenario() {
        let r = payoff_ratio(dec!(5000000), dec!(5150000), dec!(4900000)).unwrap();
        assert_eq!(r, dec!(1.5));
    }

    #[test]
    fn pure_kelly_matches_s1_scenario() {
        // K(0.7, 1.5) = (1.5*0.7 - 0.3)/1.5 = 0.5
        assert_eq!(pure_kelly(dec!(0.7), dec!(1.5)), dec!(0.5));
    }

    #[test]
    fn pure_kelly_clamps_to_zero_and_one() {
        assert_eq!(pure_kelly(dec!(0.01), dec!(0.1)), Decimal::ZERO);
        assert_eq!(pure_kelly(dec!(0.99), dec!(50)), Decimal::ONE);
    }

    #[test]
    fn every_sizer_returns_zero_when_risk_non_positive() {
        for sizer in [
            PositionSizer::ConservativeKelly,
            PositionSizer::EstimationRiskKelly,
            PositionSizer::HalfKelly,
            PositionSizer::Fixed100Percent,
            PositionSizer::CurrentKellyTimesConfidence,
        ] {
            assert_eq!(
                sizer.size(dec!(5000000), dec!(5150000), dec!(5000000), dec!(0.7), dec!(0.2)),
                Decimal::ZERO,
                "{sizer:?} should short-circuit to 0"
            );
        }
    }

    #[test]
    fn half_kelly_is_half_of_pure_kelly() {
        let half = PositionSizer::HalfKelly.size(dec!(5000000), dec!(5150000), dec!(4900000), dec!(0.7), dec!(0.2));
        assert_eq!(half, dec!(0.25));
    }

    #[test]
    fn fixed_100_percent_ignores_inputs() {
        let f = PositionSizer::Fixed100Percent.size(dec!(1), dec!(2), dec!(0), dec!(0.01), dec!(0));
        assert_eq!(f, Decimal::ONE);
    }

    #[test]
    fn fixed_fraction_clamps() {
        assert_eq!(fixed_fraction(dec!(1.5)), Decimal::ONE);
        assert_eq!(fixed_fraction(dec!(-0.2)), Decimal::ZERO);
        assert_eq!(fixed_fraction(dec!(0.8)), dec!(0.8));
    }

    #[test]
    fn current_kelly_times_confidence_scales_down() {
        let scaled = PositionSizer::CurrentKellyTimesConfidence.size(
            dec!(5000000),
            dec!(5150000),
            dec!(4900000),
            dec!(0.7),
            dec!(0.2),
        );
        assert_eq!(scaled, dec!(0.1)); // 0.5 * 0.2
    }
}
