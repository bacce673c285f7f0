//! Precomputes a 4-hour resampled series with SMA20/SMA50/EMA20 and a
//! volume moving average, scans for golden-cross entries confirmed by a
//! volume spike, and drives `simulate_rule_based` at each one found.

use rust_decimal::Decimal;

use crate::application::simulator::simulate_rule_based;
use crate::domain::candle::Candle;
use crate::domain::fold::FoldConfig;
use crate::domain::indicators::{ema, resample_4h, sma};
use crate::domain::repositories::CandleRepository;
use crate::domain::trade::Trade;

use super::BacktestReport;

const SMA_FAST_PERIOD: usize = 20;
const SMA_SLOW_PERIOD: usize = 50;
const EMA_PERIOD: usize = 20;
const VOLUME_MA_PERIOD: usize = 20;
const VOLUME_CONFIRM_MULTIPLE: Decimal = rust_decimal_macros::dec!(1.2);

/// Bar indices `i` where bar `i - 1` confirms all of: `close > SMA20`,
/// `close > SMA50`, and `volume > 1.2 · SMA20(volume)`. The signal is read
/// one bar back so the entry itself trades at a price the signal couldn't
/// have seen.
fn find_entry_indices(series: &[Candle], sma_fast: &[Option<Decimal>], sma_slow: &[Option<Decimal>], volume_ma: &[Option<Decimal>]) -> Vec<usize> {
    let mut entries = Vec::new();
    for i in 1..series.len() {
        let prev = i - 1;
        let (Some(fast_prev), Some(slow_prev), Some(vol_ma_prev)) = (sma_fast[prev], sma_slow[prev], volume_ma[prev]) else {
            continue;
        };
        let close_prev = series[prev].close;
        let volume_prev = Decimal::try_from(series[prev].volume).unwrap_or(Decimal::ZERO);

        let trend_confirmed = close_prev > fast_prev && close_prev > slow_prev;
        let volume_confirmed = volume_prev > VOLUME_CONFIRM_MULTIPLE * vol_ma_prev;
        if trend_confirmed && volume_confirmed {
            entries.push(i);
        }
    }
    entries
}

/// `minute_series` is expected to cover extra warm-up (and one trailing day)
/// beyond `fold_config`'s own range so the 4h-resampled indicators are
/// populated by the time the fold's own period begins; entries are still
/// restricted to bars dated within `fold_config.start..=fold_config.end`.
pub async fn run_rule_based_fold(
    candles: &dyn CandleRepository,
    market: &str,
    fold_config: FoldConfig,
    minute_series: &[Candle],
    initial_capital: Decimal,
) -> anyhow::Result<BacktestReport> {
    let series = resample_4h(minute_series);
    let closes: Vec<Decimal> = series.iter().map(|c| c.close).collect();
    let volumes: Vec<Decimal> = series.iter().map(|c| Decimal::try_from(c.volume).unwrap_or(Decimal::ZERO)).collect();

    let sma_fast = sma(&closes, SMA_FAST_PERIOD);
    let sma_slow = sma(&closes, SMA_SLOW_PERIOD);
    let ema20 = ema(&closes, EMA_PERIOD);
    let volume_ma = sma(&volumes, VOLUME_MA_PERIOD);

    let entry_indices: Vec<usize> = find_entry_indices(&series, &sma_fast, &sma_slow, &volume_ma)
        .into_iter()
        .filter(|&i| {
            let date = series[i].timestamp.date();
            date >= fold_config.start && date <= fold_config.end
        })
        .collect();

    let mut capital = initial_capital;
    let mut last_exit_time = None;
    let mut trades: Vec<Trade> = Vec::new();
    let mut skipped = Vec::new();

    for entry_index in entry_indices {
        let outcome = simulate_rule_based(candles, market, &series, &ema20, entry_index, capital, last_exit_time).await?;
        match outcome {
            Ok(trade) => {
                capital = trade.capital_after;
                last_exit_time = Some(trade.exit_time);
                trades.push(trade);
            }
            Err(reason) => skipped.push(reason),
        }
    }

    Ok(BacktestReport::new(market, fold_config.fold, None, Some("rule_based_sma_cross".to_string()), trades, skipped, initial_capital, capital))
}
