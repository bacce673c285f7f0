//! Drives `simulate_cusum` across a slice of the CUSUM signal cache selected
//! by optional (strategy, model, fold) filters, in signal-time order, with
//! the same capital/overlap cursor convention as the TP/SL orchestrator.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::application::simulator::simulate_cusum;
use crate::domain::cusum::{CusumSignal, CusumSignalStore};
use crate::domain::repositories::CandleRepository;
use crate::domain::stats::BacktestStats;
use crate::domain::trade::Trade;

use super::BacktestReport;

/// Filters are all optional — an absent one matches every signal. Mirrors
/// the HTTP surface's query params (`fold`, `strategy`, `model` all nullable).
#[derive(Debug, Clone, Default)]
pub struct CusumFilter {
    pub strategy: Option<String>,
    pub model: Option<String>,
    pub fold: Option<u32>,
}

impl CusumFilter {
    pub fn matches(&self, signal: &CusumSignal) -> bool {
        self.strategy.as_deref().is_none_or(|s| s == signal.strategy) && self.model.as_deref().is_none_or(|m| m == signal.model) && self.fold.is_none_or(|f| f == signal.fold_id)
    }
}

/// Aggregates the CUSUM orchestrator publishes beyond the generic
/// `BacktestStats`: means over the signal's own metadata, not the trade
/// outcome, so they describe the signal population that was simulated.
#[derive(Debug, Clone, Default)]
pub struct CusumAggregates {
    pub mean_confidence: Decimal,
    pub mean_selectivity_pct: Decimal,
    pub mean_investment_ratio: Decimal,
    pub win_rate_excluding_timeouts_pct: Decimal,
}

fn mean(values: impl Iterator<Item = Decimal> + Clone) -> Decimal {
    let count = values.clone().count();
    if count == 0 {
        return Decimal::ZERO;
    }
    values.sum::<Decimal>() / Decimal::from(count as i64)
}

pub async fn run_cusum_fold(candles: &dyn CandleRepository, market: &str, store: &CusumSignalStore, filter: &CusumFilter, initial_capital: Decimal) -> anyhow::Result<BacktestReport> {
    let mut signals: Vec<_> = store.buy_signals().into_iter().filter(|s| filter.matches(s)).collect();
    signals.sort_by_key(|s| s.signal_time);

    let mut capital = initial_capital;
    let mut last_exit_time = None;
    let mut trades: Vec<Trade> = Vec::new();
    let mut skipped = Vec::new();

    for signal in &signals {
        let outcome = simulate_cusum(candles, market, signal, capital, last_exit_time).await?;
        match outcome {
            Ok(trade) => {
                capital = trade.capital_after;
                last_exit_time = Some(trade.exit_time);
                trades.push(trade);
            }
            Err(reason) => skipped.push(reason),
        }
    }

    Ok(BacktestReport::new(market, filter.fold.unwrap_or(0), filter.model.clone(), filter.strategy.clone(), trades, skipped, initial_capital, capital))
}

/// Computed over the simulated signal population, not the trade outcomes —
/// `mean_investment_ratio` reads trade-level `investment_ratio` since that's
/// where realised position sizing lives, the rest read signal metadata.
pub fn cusum_aggregates(report: &BacktestReport, signals: &[CusumSignal]) -> CusumAggregates {
    CusumAggregates {
        mean_confidence: mean(signals.iter().map(|s| s.confidence)),
        mean_selectivity_pct: mean(signals.iter().map(|s| s.cusum_selectivity_pct)),
        mean_investment_ratio: mean(report.trades.iter().map(|t| t.investment_ratio)),
        win_rate_excluding_timeouts_pct: BacktestStats::cusum_win_rate(&report.trades).max(dec!(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::cusum::FinalAction;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};
    use futures::stream::BoxStream;

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
            unimplemented!("not exercised by cusum orchestrator tests")
        }

        fn stream_range<'a>(&'a self, _market: &'a str, _start: NaiveDateTime, _end: NaiveDateTime) -> BoxStream<'a, anyhow::Result<Candle>> {
            unimplemented!("not exercised by cusum orchestrator tests")
        }

        async fn existing_timestamps(&self, _market: &str, _candidates: &[NaiveDateTime]) -> anyhow::Result<Vec<NaiveDateTime>> {
            unimplemented!("not exercised by cusum orchestrator tests")
        }

        async fn oldest_timestamp(&self, _market: &str) -> anyhow::Result<Option<NaiveDateTime>> {
            unimplemented!("not exercised by cusum orchestrator tests")
        }

        async fn insert_many(&self, _candles: &[Candle]) -> anyhow::Result<usize> {
            unimplemented!("not exercised by cusum orchestrator tests")
        }
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    fn signal(strategy: &str, model: &str, fold_id: u32, signal_time: NaiveDateTime) -> CusumSignal {
        CusumSignal {
            signal_time,
            strategy: strategy.to_string(),
            model: model.to_string(),
            fold_id,
            primary_signal: true,
            ml_prediction: 1,
            final_action: FinalAction::Buy,
            confidence: dec!(0.7),
            threshold: dec!(0.5),
            cusum_selectivity_pct: dec!(5.0),
            suggested_weight: dec!(0.5),
            entry_price_ref: dec!(5000000),
            take_profit_price: dec!(5150000),
            stop_loss_price: dec!(4900000),
            expiration_time: signal_time + chrono::Duration::days(5),
            actual_direction: Some("UP".to_string()),
            correct: Some(true),
        }
    }

    fn candle(day: u32, hour: u32, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Candle {
        Candle::new("KRW-ETH", at(day, hour), o, h, l, c, 1.0)
    }

    #[test]
    fn filter_with_no_fields_set_matches_everything() {
        let filter = CusumFilter::default();
        assert!(filter.matches(&signal("trend", "gru", 1, at(15, 9))));
    }

    #[test]
    fn filter_narrows_on_each_field_independently() {
        let s = signal("trend", "gru", 3, at(15, 9));
        assert!(!CusumFilter { strategy: Some("other".to_string()), ..Default::default() }.matches(&s));
        assert!(!CusumFilter { model: Some("other".to_string()), ..Default::default() }.matches(&s));
        assert!(!CusumFilter { fold: Some(1), ..Default::default() }.matches(&s));
        assert!(CusumFilter { strategy: Some("trend".to_string()), fold: Some(3), ..Default::default() }.matches(&s));
    }

    #[tokio::test]
    async fn run_cusum_fold_filters_sorts_and_compounds_capital() {
        let repo = FakeCandleRepository {
            candles: vec![
                candle(15, 9, dec!(5000000), dec!(5200000), dec!(4950000), dec!(5100000)),
                candle(16, 9, dec!(5000000), dec!(5200000), dec!(4950000), dec!(5100000)),
            ],
        };
        let signals = vec![
            signal("trend", "gru", 1, at(16, 9)),
            signal("trend", "gru", 1, at(15, 9)),
            signal("other", "gru", 1, at(15, 9)),
        ];
        let store = CusumSignalStore::new(signals);
        let filter = CusumFilter { strategy: Some("trend".to_string()), ..Default::default() };

        let report = run_cusum_fold(&repo, "KRW-ETH", &store, &filter, dec!(10000)).await.unwrap();

        assert_eq!(report.trades.len(), 2);
        assert_eq!(report.trades[0].entry_time, at(15, 9));
        assert_eq!(report.trades[1].entry_time, at(16, 9));
        assert_eq!(report.final_capital, report.trades[1].capital_after);
    }

    #[test]
    fn aggregates_average_signal_metadata_and_trade_investment_ratio() {
        let signals = vec![signal("trend", "gru", 1, at(15, 9)), signal("trend", "gru", 1, at(16, 9))];
        let report = BacktestReport::new("KRW-ETH", 0, None, None, Vec::new(), Vec::new(), dec!(10000), dec!(10000));

        let aggregates = cusum_aggregates(&report, &signals);

        assert_eq!(aggregates.mean_confidence, dec!(0.7));
        assert_eq!(aggregates.mean_selectivity_pct, dec!(5.0));
        assert_eq!(aggregates.mean_investment_ratio, Decimal::ZERO);
    }
}
