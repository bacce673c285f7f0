//! Buy-and-hold baseline, run independently per fold (no capital chaining —
//! each fold is scored against the same starting capital so it's directly
//! comparable to the other orchestrators' per-fold reports).

use rust_decimal::Decimal;

use crate::application::simulator::simulate_buy_and_hold;
use crate::domain::fold::FoldConfig;
use crate::domain::repositories::CandleRepository;

use super::BacktestReport;

pub async fn run_buy_and_hold_fold(candles: &dyn CandleRepository, market: &str, fold: FoldConfig, initial_capital: Decimal) -> anyhow::Result<BacktestReport> {
    let outcome = simulate_buy_and_hold(candles, market, fold, initial_capital).await?;

    let (trades, skipped, final_capital) = match outcome {
        Ok(trade) => {
            let capital_after = trade.capital_after;
            (vec![trade], Vec::new(), capital_after)
        }
        Err(reason) => (Vec::new(), vec![reason], initial_capital),
    };

    Ok(BacktestReport::new(market, fold.fold, None, Some("buy_and_hold".to_string()), trades, skipped, initial_capital, final_capital))
}
