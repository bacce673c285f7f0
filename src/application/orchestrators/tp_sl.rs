//! Drives `simulate_single_exit`/`simulate_laddered_exit` across one fold's
//! predictions, in date order, carrying capital and the last exit time
//! forward from trade to trade so overlapping entries are skipped.

use rust_decimal::Decimal;

use crate::application::simulator::{simulate_laddered_exit, simulate_single_exit};
use crate::domain::prediction::Prediction;
use crate::domain::repositories::CandleRepository;
use crate::domain::sizing::PositionSizer;
use crate::domain::trade::Trade;

use super::BacktestReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStyle {
    Single,
    Laddered,
}

pub async fn run_tp_sl_fold(
    candles: &dyn CandleRepository,
    market: &str,
    fold: u32,
    predictions: &[Prediction],
    sizer: PositionSizer,
    exit_style: ExitStyle,
    holding_period_days: i64,
    initial_capital: Decimal,
) -> anyhow::Result<BacktestReport> {
    let mut ordered: Vec<&Prediction> = predictions.iter().collect();
    ordered.sort_by_key(|p| p.date);

    let mut capital = initial_capital;
    let mut last_exit_time = None;
    let mut trades: Vec<Trade> = Vec::new();
    let mut skipped = Vec::new();
    let model = ordered.first().map(|p| p.model.clone());

    for prediction in ordered {
        let outcome = match exit_style {
            ExitStyle::Single => simulate_single_exit(candles, market, prediction, sizer, capital, holding_period_days, last_exit_time).await?,
            ExitStyle::Laddered => simulate_laddered_exit(candles, market, prediction, sizer, capital, holding_period_days, last_exit_time).await?,
        };

        match outcome {
            Ok(trade) => {
                capital = trade.capital_after;
                last_exit_time = Some(trade.exit_time);
                trades.push(trade);
            }
            Err(reason) => skipped.push(reason),
        }
    }

    Ok(BacktestReport::new(market, fold, model, None, trades, skipped, initial_capital, capital))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};
    use futures::stream::BoxStream;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct FakeCandleRepository {
        candles: Vec<Candle>,
    }

    #[async_trait]
    impl CandleRepository for FakeCandleRepository {
        async fn find_first_at_or_after(&self, market: &str, at: NaiveDateTime) -> anyhow::Result<Option<Candle>> {
            Ok(self.candles.iter().filter(|c| c.market == market && c.timestamp >= at).min_by_key(|c| c.timestamp).cloned())
        }

        async fn find_range(&self, _market: &str, _start: NaiveDateTime, _end: NaiveDateTime) -> anyhow::Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        fn stream_range<'a>(&'a self, market: &'a str, start: NaiveDateTime, end: NaiveDateTime) -> BoxStream<'a, anyhow::Result<Candle>> {
            let mut out: Vec<Candle> = self.candles.iter().filter(|c| c.market == market && c.timestamp >= start && c.timestamp < end).cloned().collect();
            out.sort_by_key(|c| c.timestamp);
            Box::pin(futures::stream::iter(out.into_iter().map(Ok)))
        }

        async fn existing_timestamps(&self, _market: &str, _candidates: &[NaiveDateTime]) -> anyhow::Result<Vec<NaiveDateTime>> {
            unimplemented!()
        }

        async fn oldest_timestamp(&self, _market: &str) -> anyhow::Result<Option<NaiveDateTime>> {
            unimplemented!()
        }

        async fn insert_many(&self, _candles: &[Candle]) -> anyhow::Result<usize> {
            unimplemented!()
        }
    }

    fn prediction(date: NaiveDate, tp: Decimal, sl: Decimal) -> Prediction {
        Prediction {
            market: "KRW-ETH".to_string(),
            date,
            fold: 1,
            model: "gru".to_string(),
            actual_direction: None,
            actual_return: None,
            pred_direction: "UP".to_string(),
            pred_proba_up: dec!(0.7),
            pred_proba_down: dec!(0.3),
            max_proba: dec!(0.7),
            confidence: dec!(0.2),
            take_profit_price: tp,
            stop_loss_price: sl,
            correct: None,
        }
    }

    fn at(date: NaiveDate, hour: u32) -> NaiveDateTime {
        date.and_hms_opt(hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn capital_chains_across_consecutive_winning_trades() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let candles = vec![
            Candle::new("KRW-ETH", at(d1, 9), dec!(5000000), dec!(5200000), dec!(4950000), dec!(5100000), 1.0),
            Candle::new("KRW-ETH", at(d2, 9), dec!(5200000), dec!(5400000), dec!(5150000), dec!(5300000), 1.0),
        ];
        let repo = FakeCandleRepository { candles };
        let predictions = vec![prediction(d1, dec!(5150000), dec!(4900000)), prediction(d2, dec!(5390000), dec!(5150000))];

        let report = run_tp_sl_fold(&repo, "KRW-ETH", 1, &predictions, PositionSizer::HalfKelly, ExitStyle::Single, 8, dec!(10000)).await.unwrap();

        assert_eq!(report.trades.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(report.final_capital, report.trades[1].capital_after);
        assert_eq!(report.trades[1].capital_before, report.trades[0].capital_after);
    }
}
