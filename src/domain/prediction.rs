//! One AI-model prediction row per (market, date, fold, model).
//!
//! Bulk-loaded by the CSV prediction loader, then read-only for the
//! lifetime of the process.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Directional label carried by both the actual outcome and the model's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UP" => Ok(Direction::Up),
            "DOWN" => Ok(Direction::Down),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Prediction {
    pub market: String,
    pub date: NaiveDate,
    pub fold: u32,
    pub model: String,
    pub actual_direction: Option<String>,
    pub actual_return: Option<Decimal>,
    pub pred_direction: String,
    pub pred_proba_up: Decimal,
    pub pred_proba_down: Decimal,
    pub max_proba: Decimal,
    pub confidence: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    pub correct: Option<bool>,
}

impl Prediction {
    /// `predProbaUp + predProbaDown ≈ 1` within a small numeric tolerance.
    pub fn probabilities_are_consistent(&self) -> bool {
        let sum = self.pred_proba_up + self.pred_proba_down;
        (sum - Decimal::ONE).abs() < Decimal::new(1, 3)
    }

    pub fn tp_above_sl(&self) -> bool {
        self.stop_loss_price < self.take_profit_price
    }

    pub fn direction(&self) -> Option<Direction> {
        Direction::from_str(&self.pred_direction).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Prediction {
        Prediction {
            market: "KRW-ETH".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            fold: 1,
            model: "gru".to_string(),
            actual_direction: Some("UP".to_string()),
            actual_return: Some(dec!(0.012)),
            pred_direction: "UP".to_string(),
            pred_proba_up: dec!(0.7),
            pred_proba_down: dec!(0.3),
            max_proba: dec!(0.7),
            confidence: dec!(0.2),
            take_profit_price: dec!(5150000),
            stop_loss_price: dec!(4900000),
            correct: Some(true),
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        assert!(sample().probabilities_are_consistent());
    }

    #[test]
    fn inconsistent_probabilities_fail() {
        let mut p = sample();
        p.pred_proba_down = dec!(0.5);
        assert!(!p.probabilities_are_consistent());
    }

    #[test]
    fn stop_loss_below_take_profit() {
        assert!(sample().tp_above_sl());
    }

    #[test]
    fn direction_parses_from_column() {
        assert_eq!(sample().direction(), Some(Direction::Up));
    }
}
