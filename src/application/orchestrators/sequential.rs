//! Walks the 8 compiled-in folds in order for one model, carrying capital
//! from one fold's final balance into the next fold's starting balance —
//! the "does this model survive a full walk-forward" view, as opposed to
//! each fold being scored in isolation against the same starting capital.

use rust_decimal::Decimal;

use crate::application::simulator::simulate_single_exit_fixed_fraction;
use crate::domain::fold::all_folds;
use crate::domain::repositories::{CandleRepository, PredictionRepository};
use crate::domain::trade::Trade;

use super::buy_and_hold::run_buy_and_hold_fold;
use super::BacktestReport;

/// Both strands of a sequential walk-forward: the fixed-fraction Kelly
/// chain driven by predictions, and an independently-compounding
/// buy-and-hold chain over the same folds, for comparison.
#[derive(Debug, Clone)]
pub struct SequentialChainResult {
    pub kelly: Vec<BacktestReport>,
    pub buy_and_hold: Vec<BacktestReport>,
}

pub async fn run_sequential_chain(
    candles: &dyn CandleRepository,
    predictions: &dyn PredictionRepository,
    market: &str,
    model: &str,
    fixed_fraction_pct: Decimal,
    holding_period_days: i64,
    initial_capital: Decimal,
) -> anyhow::Result<SequentialChainResult> {
    let mut capital = initial_capital;
    let mut kelly = Vec::new();

    for fold in all_folds() {
        let mut fold_predictions = predictions.find_by_fold_model(market, fold.fold, model).await?;
        fold_predictions.sort_by_key(|p| p.date);

        let fold_starting_capital = capital;
        let mut last_exit_time = None;
        let mut trades: Vec<Trade> = Vec::new();
        let mut skipped = Vec::new();

        for prediction in &fold_predictions {
            let outcome =
                simulate_single_exit_fixed_fraction(candles, market, prediction, fixed_fraction_pct, capital, holding_period_days, last_exit_time).await?;
            match outcome {
                Ok(trade) => {
                    capital = trade.capital_after;
                    last_exit_time = Some(trade.exit_time);
                    trades.push(trade);
                }
                Err(reason) => skipped.push(reason),
            }
        }

        kelly.push(BacktestReport::new(market, fold.fold, Some(model.to_string()), None, trades, skipped, fold_starting_capital, capital));
    }

    let mut buy_and_hold_capital = initial_capital;
    let mut buy_and_hold = Vec::new();
    for fold in all_folds() {
        let report = run_buy_and_hold_fold(candles, market, fold, buy_and_hold_capital).await?;
        buy_and_hold_capital = report.final_capital;
        buy_and_hold.push(report);
    }

    Ok(SequentialChainResult { kelly, buy_and_hold })
}
