//! Decimal rounding helpers shared by the simulator and orchestrators.
//!
//! Every rounding mode the spec prescribes is a thin wrapper over
//! `Decimal::round_dp_with_strategy` so call sites read as intent
//! ("floor the position size", "ceil the fee") rather than raw strategy enums.

use rust_decimal::{Decimal, RoundingStrategy};

/// Floor toward zero to `places` decimals. Used for position size (2dp) and
/// base-asset quantity (8dp).
pub fn floor_to(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::ToZero)
}

/// Ceil away from zero to `places` decimals. Used for fees (2dp).
pub fn ceil_to(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::AwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn floor_to_truncates_positive() {
        assert_eq!(floor_to(dec!(5000.9995), 2), dec!(5000.99));
    }

    #[test]
    fn ceil_to_rounds_up_positive() {
        assert_eq!(ceil_to(dec!(2.5001), 2), dec!(2.51));
    }

    #[test]
    fn floor_to_eight_places_for_quantity() {
        assert_eq!(floor_to(dec!(0.000999500001), 8), dec!(0.00099950));
    }

    #[test]
    fn ceil_to_exact_value_is_unchanged() {
        assert_eq!(ceil_to(dec!(2.50), 2), dec!(2.50));
    }
}
