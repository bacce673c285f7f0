//! Trade record produced by the per-trade simulator. Not persisted by the
//! core — orchestrators hold these in memory for the duration of a run and
//! report them back to the caller.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Timeout,
    ProfitLadder,
    TimeDecay,
    EmaCross,
    EndOfPeriod,
}

/// Why the simulator declined to open a position for a given signal. Never
/// thrown as an error — see `SimOutcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoEntryCandle,
    NonPositiveSize,
    BelowMinUnit,
    Overlap,
    NoCandlesInWindow,
}

/// One partial or full exit of a position, in the order it occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitEvent {
    pub time: NaiveDateTime,
    pub price: Decimal,
    /// Base-asset quantity closed by this event.
    pub quantity: Decimal,
    pub reason: ExitReason,
    /// Net profit attributable to this event (quote currency).
    pub profit: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeContext {
    pub model: Option<String>,
    pub strategy: Option<String>,
    pub confidence: Option<Decimal>,
    pub selectivity_pct: Option<Decimal>,
    pub threshold: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub market: String,
    pub entry_time: NaiveDateTime,
    pub entry_price: Decimal,
    pub exit_time: NaiveDateTime,
    /// Quantity-weighted average exit price across all exit events.
    pub exit_price: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    /// Position size in quote currency, before fees.
    pub position_size: Decimal,
    /// `position_size / capital_before`.
    pub investment_ratio: Decimal,
    pub net_profit: Decimal,
    pub return_pct: Decimal,
    pub capital_before: Decimal,
    pub capital_after: Decimal,
    pub exit_reason: ExitReason,
    pub holding_days: Decimal,
    pub events: Vec<ExitEvent>,
    pub context: TradeContext,
}

impl Trade {
    /// `entryDateTime ≤ exitDateTime`.
    pub fn time_order_holds(&self) -> bool {
        self.entry_time <= self.exit_time
    }

    pub fn is_win(&self) -> bool {
        self.net_profit > Decimal::ZERO
    }
}

pub type SimOutcome = Result<Trade, SkipReason>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    fn sample_trade() -> Trade {
        Trade {
            market: "KRW-ETH".to_string(),
            entry_time: at(9),
            entry_price: dec!(5000000),
            exit_time: at(10),
            exit_price: dec!(5150000),
            take_profit_price: dec!(5150000),
            stop_loss_price: dec!(4900000),
            position_size: dec!(5000),
            investment_ratio: dec!(0.5),
            net_profit: dec!(144.66),
            return_pct: dec!(2.89),
            capital_before: dec!(10000),
            capital_after: dec!(10144.66),
            exit_reason: ExitReason::TakeProfit,
            holding_days: dec!(0.04),
            events: Vec::new(),
            context: TradeContext::default(),
        }
    }

    #[test]
    fn time_order_holds_for_normal_trade() {
        assert!(sample_trade().time_order_holds());
    }

    #[test]
    fn positive_profit_is_a_win() {
        assert!(sample_trade().is_win());
        let mut losing = sample_trade();
        losing.net_profit = dec!(-10);
        assert!(!losing.is_win());
    }
}
