//! Pure, stateless technical-indicator functions over ordered numeric
//! sequences of equal length.
//!
//! Leading positions that lack sufficient history return `None` rather than
//! a sentinel float — callers `filter_map`. This mirrors the teacher's
//! avoidance of float sentinels for "missing": a `Vec<Option<Decimal>>` makes
//! the undefined region explicit in the type rather than relying on NaN
//! propagation.

use chrono::{Duration, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use super::candle::Candle;

/// Simple moving average. `None` for the first `period - 1` positions.
pub fn sma(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        if i + 1 < period {
            out.push(None);
            continue;
        }
        let window = &values[i + 1 - period..=i];
        let sum: Decimal = window.iter().copied().sum();
        out.push(Some(sum / Decimal::from(period as i64)));
    }
    out
}

/// Exponential moving average, smoothing `2 / (period + 1)`, seeded with the
/// first price. Unlike `sma`, every position is defined.
pub fn ema(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }
    let alpha = Decimal::TWO / Decimal::from((period + 1) as i64);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(Some(prev));
    for value in &values[1..] {
        prev = alpha * *value + (Decimal::ONE - alpha) * prev;
        out.push(Some(prev));
    }
    out
}

/// Population standard deviation over a rolling window.
pub fn rolling_stddev(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let means = sma(values, period);
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        match means[i] {
            None => out.push(None),
            Some(mean) => {
                let window = &values[i + 1 - period..=i];
                let variance: Decimal = window
                    .iter()
                    .map(|v| {
                        let diff = *v - mean;
                        diff * diff
                    })
                    .sum::<Decimal>()
                    / Decimal::from(period as i64);
                out.push(Some(decimal_sqrt(variance)));
            }
        }
    }
    out
}

/// `Decimal` has no native sqrt; round-trip through `f64` the same way the
/// teacher's performance stats do for Sharpe's stddev component.
fn decimal_sqrt(value: Decimal) -> Decimal {
    let as_f64 = value.to_f64().unwrap_or(0.0).max(0.0);
    Decimal::try_from(as_f64.sqrt()).unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBand {
    pub sma: Decimal,
    pub upper: Decimal,
    pub lower: Decimal,
    pub width: Decimal,
}

/// `upper = sma + k·σ`, `lower = sma − k·σ`, `width = (upper − lower) / sma`.
pub fn bollinger_bands(values: &[Decimal], period: usize, k: Decimal) -> Vec<Option<BollingerBand>> {
    let means = sma(values, period);
    let stddevs = rolling_stddev(values, period);
    means
        .into_iter()
        .zip(stddevs)
        .map(|(mean, stddev)| match (mean, stddev) {
            (Some(mean), Some(stddev)) if mean != Decimal::ZERO => {
                let upper = mean + k * stddev;
                let lower = mean - k * stddev;
                Some(BollingerBand {
                    sma: mean,
                    upper,
                    lower,
                    width: (upper - lower) / mean,
                })
            }
            _ => None,
        })
        .collect()
}

/// True range per candle. The first candle has no previous close, so it
/// falls back to `high - low`, the conventional bootstrap.
pub fn true_range(candles: &[Candle]) -> Vec<Decimal> {
    let mut out = Vec::with_capacity(candles.len());
    for (i, candle) in candles.iter().enumerate() {
        let range = candle.high - candle.low;
        if i == 0 {
            out.push(range);
            continue;
        }
        let prev_close = candles[i - 1].close;
        let hc = (candle.high - prev_close).abs();
        let lc = (candle.low - prev_close).abs();
        out.push(range.max(hc).max(lc));
    }
    out
}

/// `ATR(period) = SMA(TrueRange, period)`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    sma(&true_range(candles), period)
}

/// `NATR = 100 · ATR / close`.
pub fn natr(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    let atr_values = atr(candles, period);
    atr_values
        .into_iter()
        .zip(candles.iter())
        .map(|(a, candle)| a.filter(|_| candle.close != Decimal::ZERO).map(|a| dec!(100) * a / candle.close))
        .collect()
}

/// Rolling maximum over a window of size `period`.
pub fn rolling_max(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        if i + 1 < period {
            out.push(None);
            continue;
        }
        let window = &values[i + 1 - period..=i];
        out.push(window.iter().copied().max());
    }
    out
}

/// Linear-interpolation quantile over a fixed slice (not a rolling window) —
/// shared by `rolling_quantile` and the orchestrators' threshold resolution
/// so the two never disagree at the boundary.
pub fn quantile(values: &[Decimal], q: Decimal) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<Decimal> = values.to_vec();
    sorted.sort();
    let n = sorted.len();
    if n == 1 {
        return Some(sorted[0]);
    }
    let q = q.clamp(Decimal::ZERO, Decimal::ONE);
    let rank = q * Decimal::from((n - 1) as i64);
    let lower_idx = rank.floor().to_usize().unwrap_or(0).min(n - 1);
    let upper_idx = rank.ceil().to_usize().unwrap_or(0).min(n - 1);
    if lower_idx == upper_idx {
        return Some(sorted[lower_idx]);
    }
    let frac = rank - Decimal::from(lower_idx as i64);
    Some(sorted[lower_idx] + frac * (sorted[upper_idx] - sorted[lower_idx]))
}

/// Rolling quantile at level `q ∈ [0, 1]` over a window of size `period`,
/// using the same linear-interpolation rule as `quantile`.
pub fn rolling_quantile(values: &[Decimal], period: usize, q: Decimal) -> Vec<Option<Decimal>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        if i + 1 < period {
            out.push(None);
            continue;
        }
        let window = &values[i + 1 - period..=i];
        out.push(quantile(window, q));
    }
    out
}

/// `volume[i] > k · volumeMA[i]`.
pub fn volume_spike(volume: &[f64], period: usize, k: f64) -> Vec<Option<bool>> {
    let mut out = Vec::with_capacity(volume.len());
    for i in 0..volume.len() {
        if i + 1 < period || period == 0 {
            out.push(None);
            continue;
        }
        let window = &volume[i + 1 - period..=i];
        let mean: f64 = window.iter().sum::<f64>() / period as f64;
        out.push(Some(volume[i] > k * mean));
    }
    out
}

/// Which 4-hour bucket `ts` belongs to. Buckets begin at 01:00, 05:00,
/// 09:00, 13:00, 17:00, 21:00 local time; the 21:00 bucket runs through
/// 00:59 of the following calendar day.
fn bucket_start(ts: NaiveDateTime) -> NaiveDateTime {
    let hour = ts.hour();
    if hour == 0 {
        let prev_day = ts.date() - Duration::days(1);
        return prev_day.and_hms_opt(21, 0, 0).unwrap();
    }
    let idx = (hour - 1) / 4;
    let start_hour = 1 + 4 * idx;
    ts.date().and_hms_opt(start_hour, 0, 0).unwrap()
}

use chrono::Timelike;

/// Resample 1-minute candles into 4-hour buckets. Input must be sorted
/// ascending by timestamp and belong to a single market.
pub fn resample_4h(candles: &[Candle]) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::new();
    let mut current_bucket: Option<NaiveDateTime> = None;

    for candle in candles {
        let bucket = bucket_start(candle.timestamp);
        if current_bucket != Some(bucket) {
            out.push(Candle {
                market: candle.market.clone(),
                timestamp: bucket,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
            });
            current_bucket = Some(bucket);
        } else if let Some(last) = out.last_mut() {
            last.high = last.high.max(candle.high);
            last.low = last.low.min(candle.low);
            last.close = candle.close;
            last.volume += candle.volume;
        }
    }

    out
}
