//! OHLCV candle value type, shared between the minute and daily granularities.
//!
//! Appended by the ingestion pipeline, never mutated, never deleted by the
//! core. `(market, timestamp)` is unique at the repository layer.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Candle {
    pub market: String,
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        market: impl Into<String>,
        timestamp: NaiveDateTime,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: f64,
    ) -> Self {
        Self {
            market: market.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// `low ≤ open,close ≤ high` and `low ≤ high` and `volume ≥ 0`.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.low <= self.high
            && self.volume >= 0.0
    }

    pub fn is_green(&self) -> bool {
        self.close >= self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn valid_candle_passes_invariant() {
        let c = Candle::new(
            "KRW-ETH",
            at(9, 0),
            dec!(5000000),
            dec!(5200000),
            dec!(4950000),
            dec!(5100000),
            12.5,
        );
        assert!(c.is_valid());
    }

    #[test]
    fn candle_with_high_below_open_is_invalid() {
        let c = Candle::new(
            "KRW-ETH",
            at(9, 0),
            dec!(5000000),
            dec!(4999999),
            dec!(4950000),
            dec!(4980000),
            1.0,
        );
        assert!(!c.is_valid());
    }

    #[test]
    fn negative_volume_is_invalid() {
        let c = Candle::new(
            "KRW-ETH",
            at(9, 0),
            dec!(100),
            dec!(110),
            dec!(90),
            dec!(105),
            -1.0,
        );
        assert!(!c.is_valid());
    }

    #[test]
    fn green_candle_closes_at_or_above_open() {
        let c = Candle::new("KRW-ETH", at(9, 0), dec!(100), dec!(110), dec!(95), dec!(105), 1.0);
        assert!(c.is_green());
    }
}
