//! Per-trade simulator — the sharp edge of the system. Given one signal row
//! and current capital, produces either a `Trade` or a `SkipReason`. Never
//! returns `Err` for a missing candle or a non-viable size; only a genuine
//! I/O failure against the candle store propagates as `anyhow::Error`.
//!
//! `simulate_single_exit`, `simulate_cusum` and `simulate_rule_based` each
//! resolve one exit; `simulate_laddered_exit` may emit several `ExitEvent`s.
//! Overlap prevention (`last_exit_time`) is accepted here but enforced by
//! the orchestrators (C6), which own the running cursor across a fold.

use chrono::{Duration, NaiveDateTime};
use futures::StreamExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::candle::Candle;
use crate::domain::cusum::CusumSignal;
use crate::domain::fold::FoldConfig;
use crate::domain::money::{ceil_to, floor_to};
use crate::domain::prediction::Prediction;
use crate::domain::repositories::CandleRepository;
use crate::domain::sizing::PositionSizer;
use crate::domain::trade::{ExitEvent, ExitReason, SimOutcome, SkipReason, Trade, TradeContext};

/// Taker fee on both entry and exit, 0.05%.
pub const FEE_RATE: Decimal = dec!(0.0005);

fn minutes_as_days(minutes: i64) -> Decimal {
    Decimal::from(minutes) / dec!(1440)
}

/// Tie-break rule for a candle where both TP and SL are touched:
/// on the entry candle, break on close vs. entry price; on any later
/// candle, break on close vs. that candle's own open (green vs. red).
fn resolve_tp_sl_exit(candle: &Candle, tp: Decimal, sl: Decimal, entry_price: Decimal, is_entry_candle: bool) -> Option<(Decimal, ExitReason)> {
    let tp_hit = candle.high >= tp;
    let sl_hit = candle.low <= sl;

    if tp_hit && sl_hit {
        let tp_first = if is_entry_candle { candle.close >= entry_price } else { candle.close >= candle.open };
        return Some(if tp_first { (tp, ExitReason::TakeProfit) } else { (sl, ExitReason::StopLoss) });
    }
    if tp_hit {
        return Some((tp, ExitReason::TakeProfit));
    }
    if sl_hit {
        return Some((sl, ExitReason::StopLoss));
    }
    None
}

/// Full-close rule for the laddered exit: unlike `resolve_tp_sl_exit`, STOP_LOSS
/// always wins on a same-candle collision — no close-direction tie-break.
fn resolve_laddered_tp_sl_exit(candle: &Candle, tp: Decimal, sl: Decimal) -> Option<(Decimal, ExitReason)> {
    if candle.low <= sl {
        return Some((sl, ExitReason::StopLoss));
    }
    if candle.high >= tp {
        return Some((tp, ExitReason::TakeProfit));
    }
    None
}

enum ScanResult {
    Exit(NaiveDateTime, Decimal, ExitReason),
    Timeout(NaiveDateTime, Decimal),
    Empty,
}

/// Streams `[start, end)`, applying `resolve_tp_sl_exit` candle by candle.
/// Shared by the single-exit and CUSUM variants, which differ only in how
/// entry, TP/SL, and the window end are resolved.
async fn scan_tp_sl_exit(
    candles: &dyn CandleRepository,
    market: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    entry_price: Decimal,
    tp: Decimal,
    sl: Decimal,
) -> anyhow::Result<ScanResult> {
    let mut stream = candles.stream_range(market, start, end);
    let mut is_first = true;
    let mut last: Option<Candle> = None;

    while let Some(candle) = stream.next().await {
        let candle = candle?;
        if let Some((price, reason)) = resolve_tp_sl_exit(&candle, tp, sl, entry_price, is_first) {
            return Ok(ScanResult::Exit(candle.timestamp, price, reason));
        }
        last = Some(candle);
        is_first = false;
    }

    Ok(match last {
        Some(c) => ScanResult::Timeout(c.timestamp, c.close),
        None => ScanResult::Empty,
    })
}

struct ResolvedEntry {
    entry_time: NaiveDateTime,
    entry_price: Decimal,
    position_size: Decimal,
    entry_fee: Decimal,
    quantity: Decimal,
}

struct EntryCandle {
    entry_time: NaiveDateTime,
    entry_price: Decimal,
}

async fn resolve_entry_candle(
    candles: &dyn CandleRepository,
    market: &str,
    target: NaiveDateTime,
    last_exit_time: Option<NaiveDateTime>,
) -> anyhow::Result<Result<EntryCandle, SkipReason>> {
    let Some(entry_candle) = candles.find_first_at_or_after(market, target).await? else {
        return Ok(Err(SkipReason::NoEntryCandle));
    };
    let entry_time = entry_candle.timestamp;

    if let Some(last_exit) = last_exit_time {
        if entry_time < last_exit {
            return Ok(Err(SkipReason::Overlap));
        }
    }

    Ok(Ok(EntryCandle { entry_time, entry_price: entry_candle.open }))
}

fn size_position(entry_price: Decimal, fraction: Decimal, capital_before: Decimal) -> Result<(Decimal, Decimal, Decimal), SkipReason> {
    if fraction <= Decimal::ZERO {
        return Err(SkipReason::NonPositiveSize);
    }
    let position_size = floor_to(capital_before * fraction, 2);
    if position_size < Decimal::ONE {
        return Err(SkipReason::BelowMinUnit);
    }
    let entry_fee = ceil_to(position_size * FEE_RATE, 2);
    let quantity = floor_to((position_size - entry_fee) / entry_price, 8);
    Ok((position_size, entry_fee, quantity))
}

/// Steps 1-3 of the single-exit algorithm, shared with the laddered variant:
/// resolve the entry candle, size the position via the given Kelly-family
/// sizer, deduct the entry fee, and convert to base-asset quantity.
async fn resolve_prediction_entry(
    candles: &dyn CandleRepository,
    market: &str,
    prediction: &Prediction,
    sizer: PositionSizer,
    capital_before: Decimal,
    last_exit_time: Option<NaiveDateTime>,
) -> anyhow::Result<Result<ResolvedEntry, SkipReason>> {
    let target = prediction.date.and_hms_opt(9, 0, 0).expect("09:00 is a valid time");
    let entry = match resolve_entry_candle(candles, market, target, last_exit_time).await? {
        Ok(entry) => entry,
        Err(reason) => return Ok(Err(reason)),
    };

    let fraction = sizer.size(entry.entry_price, prediction.take_profit_price, prediction.stop_loss_price, prediction.pred_proba_up, prediction.confidence);
    let (position_size, entry_fee, quantity) = match size_position(entry.entry_price, fraction, capital_before) {
        Ok(sized) => sized,
        Err(reason) => return Ok(Err(reason)),
    };

    Ok(Ok(ResolvedEntry {
        entry_time: entry.entry_time,
        entry_price: entry.entry_price,
        position_size,
        entry_fee,
        quantity,
    }))
}

/// Same entry resolution as `resolve_prediction_entry`, but sized by a
/// caller-supplied fixed fraction instead of a Kelly-family sizer — used by
/// the sequential fold chain, which holds one fraction constant across folds.
async fn resolve_prediction_entry_fixed_fraction(
    candles: &dyn CandleRepository,
    market: &str,
    prediction: &Prediction,
    fraction_pct: Decimal,
    capital_before: Decimal,
    last_exit_time: Option<NaiveDateTime>,
) -> anyhow::Result<Result<ResolvedEntry, SkipReason>> {
    let target = prediction.date.and_hms_opt(9, 0, 0).expect("09:00 is a valid time");
    let entry = match resolve_entry_candle(candles, market, target, last_exit_time).await? {
        Ok(entry) => entry,
        Err(reason) => return Ok(Err(reason)),
    };

    let fraction = crate::domain::sizing::fixed_fraction(fraction_pct);
    let (position_size, entry_fee, quantity) = match size_position(entry.entry_price, fraction, capital_before) {
        Ok(sized) => sized,
        Err(reason) => return Ok(Err(reason)),
    };

    Ok(Ok(ResolvedEntry {
        entry_time: entry.entry_time,
        entry_price: entry.entry_price,
        position_size,
        entry_fee,
        quantity,
    }))
}

fn investment_ratio(position_size: Decimal, capital_before: Decimal) -> Decimal {
    if capital_before.is_zero() { Decimal::ZERO } else { position_size / capital_before }
}

fn finish_single_exit_trade(market: &str, entry: ResolvedEntry, tp: Decimal, sl: Decimal, scan: ScanResult, capital_before: Decimal, context: TradeContext) -> SimOutcome {
    let (exit_time, exit_price, exit_reason) = match scan {
        ScanResult::Exit(t, p, r) => (t, p, r),
        ScanResult::Timeout(t, c) => (t, c, ExitReason::Timeout),
        ScanResult::Empty => return Err(SkipReason::NoCandlesInWindow),
    };

    let proceeds = entry.quantity * exit_price;
    let exit_fee = ceil_to(proceeds * FEE_RATE, 2);
    let net_profit = proceeds - exit_fee - entry.position_size;
    let return_pct = if entry.position_size.is_zero() { Decimal::ZERO } else { net_profit / entry.position_size * dec!(100) };
    let capital_after = capital_before + net_profit;
    let holding_days = minutes_as_days((exit_time - entry.entry_time).num_minutes());

    let event = ExitEvent {
        time: exit_time,
        price: exit_price,
        quantity: entry.quantity,
        reason: exit_reason,
        profit: net_profit,
    };

    Ok(Trade {
        market: market.to_string(),
        entry_time: entry.entry_time,
        entry_price: entry.entry_price,
        exit_time,
        exit_price,
        take_profit_price: tp,
        stop_loss_price: sl,
        position_size: entry.position_size,
        investment_ratio: investment_ratio(entry.position_size, capital_before),
        net_profit,
        return_pct,
        capital_before,
        capital_after,
        exit_reason,
        holding_days,
        events: vec![event],
        context,
    })
}

/// Single-exit simulation driven by a prediction row: TP/SL from the
/// prediction, window `[entry, entry + holding_period_days)`.
pub async fn simulate_single_exit(
    candles: &dyn CandleRepository,
    market: &str,
    prediction: &Prediction,
    sizer: PositionSizer,
    capital_before: Decimal,
    holding_period_days: i64,
    last_exit_time: Option<NaiveDateTime>,
) -> anyhow::Result<SimOutcome> {
    let entry = match resolve_prediction_entry(candles, market, prediction, sizer, capital_before, last_exit_time).await? {
        Ok(entry) => entry,
        Err(reason) => return Ok(Err(reason)),
    };

    let tp = prediction.take_profit_price;
    let sl = prediction.stop_loss_price;
    let window_end = entry.entry_time + Duration::days(holding_period_days);
    let scan = scan_tp_sl_exit(candles, market, entry.entry_time, window_end, entry.entry_price, tp, sl).await?;

    let context = TradeContext {
        model: Some(prediction.model.clone()),
        strategy: None,
        confidence: Some(prediction.confidence),
        selectivity_pct: None,
        threshold: None,
    };

    Ok(finish_single_exit_trade(market, entry, tp, sl, scan, capital_before, context))
}

/// Identical to `simulate_single_exit` except the position is sized by a
/// fixed fraction of capital rather than a Kelly-family sizer — the mode the
/// sequential fold chain uses to hold risk constant across regime shifts.
pub async fn simulate_single_exit_fixed_fraction(
    candles: &dyn CandleRepository,
    market: &str,
    prediction: &Prediction,
    fraction_pct: Decimal,
    capital_before: Decimal,
    holding_period_days: i64,
    last_exit_time: Option<NaiveDateTime>,
) -> anyhow::Result<SimOutcome> {
    let entry = match resolve_prediction_entry_fixed_fraction(candles, market, prediction, fraction_pct, capital_before, last_exit_time).await? {
        Ok(entry) => entry,
        Err(reason) => return Ok(Err(reason)),
    };

    let tp = prediction.take_profit_price;
    let sl = prediction.stop_loss_price;
    let window_end = entry.entry_time + Duration::days(holding_period_days);
    let scan = scan_tp_sl_exit(candles, market, entry.entry_time, window_end, entry.entry_price, tp, sl).await?;

    let context = TradeContext {
        model: Some(prediction.model.clone()),
        strategy: None,
        confidence: Some(prediction.confidence),
        selectivity_pct: None,
        threshold: None,
    };

    Ok(finish_single_exit_trade(market, entry, tp, sl, scan, capital_before, context))
}

const LADDER_L1_PCT: Decimal = dec!(0.05);
const LADDER_L2_PCT: Decimal = dec!(0.10);
const LADDER_L3_PCT: Decimal = dec!(0.20);
const LADDER_L1_FRACTION: Decimal = dec!(0.30);
const LADDER_L2_FRACTION: Decimal = dec!(0.30);
const LADDER_L3_FRACTION: Decimal = dec!(0.40);
const TIME_DECAY_DAY6_FRACTION: Decimal = dec!(0.20);
const TIME_DECAY_DAY7_FRACTION: Decimal = dec!(0.40);

fn partial_exit_event(time: NaiveDateTime, price: Decimal, quantity: Decimal, reason: ExitReason, entry_price: Decimal) -> ExitEvent {
    let proceeds = quantity * price;
    let fee = ceil_to(proceeds * FEE_RATE, 2);
    let profit = proceeds - fee - quantity * entry_price;
    ExitEvent { time, price, quantity, reason, profit }
}

/// Laddered exit: partial closes on escalating unrealised-gain thresholds
/// and on holding-period aging, full close on SL/TP touch. At most one
/// trigger fires per candle, in priority SL > TP > PROFIT_LADDER > TIME_DECAY.
pub async fn simulate_laddered_exit(
    candles: &dyn CandleRepository,
    market: &str,
    prediction: &Prediction,
    sizer: PositionSizer,
    capital_before: Decimal,
    holding_period_days: i64,
    last_exit_time: Option<NaiveDateTime>,
) -> anyhow::Result<SimOutcome> {
    let entry = match resolve_prediction_entry(candles, market, prediction, sizer, capital_before, last_exit_time).await? {
        Ok(entry) => entry,
        Err(reason) => return Ok(Err(reason)),
    };

    let tp = prediction.take_profit_price;
    let sl = prediction.stop_loss_price;
    let window_end = entry.entry_time + Duration::days(holding_period_days);

    let original_qty = entry.quantity;
    let mut remaining_qty = entry.quantity;
    let mut events: Vec<ExitEvent> = Vec::new();
    let (mut l1, mut l2, mut l3) = (false, false, false);
    let (mut td6, mut td7) = (false, false);
    let mut last_candle: Option<Candle> = None;

    let mut stream = candles.stream_range(market, entry.entry_time, window_end);
    while let Some(candle) = stream.next().await {
        let candle = candle?;
        if remaining_qty <= Decimal::ZERO {
            break;
        }

        if let Some((price, reason)) = resolve_laddered_tp_sl_exit(&candle, tp, sl) {
            events.push(partial_exit_event(candle.timestamp, price, remaining_qty, reason, entry.entry_price));
            remaining_qty = Decimal::ZERO;
            last_candle = Some(candle);
            break;
        }

        let unrealized_pct = (candle.close - entry.entry_price) / entry.entry_price;
        let ladder_tranche = if unrealized_pct >= LADDER_L3_PCT && !l3 {
            l1 = true;
            l2 = true;
            l3 = true;
            Some(LADDER_L3_FRACTION)
        } else if unrealized_pct >= LADDER_L2_PCT && !l2 {
            l1 = true;
            l2 = true;
            Some(LADDER_L2_FRACTION)
        } else if unrealized_pct >= LADDER_L1_PCT && !l1 {
            l1 = true;
            Some(LADDER_L1_FRACTION)
        } else {
            None
        };

        if let Some(fraction) = ladder_tranche {
            let qty_sold = floor_to(original_qty * fraction, 8).min(remaining_qty);
            if qty_sold > Decimal::ZERO {
                events.push(partial_exit_event(candle.timestamp, candle.close, qty_sold, ExitReason::ProfitLadder, entry.entry_price));
                remaining_qty -= qty_sold;
            }
            last_candle = Some(candle);
            continue;
        }

        let days_held = minutes_as_days((candle.timestamp - entry.entry_time).num_minutes());
        let time_decay_tranche = if days_held >= dec!(7) && !td7 {
            td6 = true;
            td7 = true;
            Some(TIME_DECAY_DAY7_FRACTION)
        } else if days_held >= dec!(6) && !td6 {
            td6 = true;
            Some(TIME_DECAY_DAY6_FRACTION)
        } else {
            None
        };

        if let Some(fraction) = time_decay_tranche {
            let qty_sold = floor_to(original_qty * fraction, 8).min(remaining_qty);
            if qty_sold > Decimal::ZERO {
                events.push(partial_exit_event(candle.timestamp, candle.close, qty_sold, ExitReason::TimeDecay, entry.entry_price));
                remaining_qty -= qty_sold;
            }
        }

        last_candle = Some(candle);
    }

    if remaining_qty > Decimal::ZERO {
        if let Some(last) = &last_candle {
            events.push(partial_exit_event(last.timestamp, last.close, remaining_qty, ExitReason::Timeout, entry.entry_price));
        }
    }

    if events.is_empty() {
        return Ok(Err(SkipReason::NoCandlesInWindow));
    }

    let total_event_profit: Decimal = events.iter().map(|e| e.profit).sum();
    let net_profit = total_event_profit - entry.entry_fee;
    let exit_time = events.last().expect("checked non-empty above").time;
    let exit_reason = events.last().expect("checked non-empty above").reason;
    let sum_qty: Decimal = events.iter().map(|e| e.quantity).sum();
    let exit_price = if sum_qty > Decimal::ZERO {
        events.iter().map(|e| e.price * e.quantity).sum::<Decimal>() / sum_qty
    } else {
        entry.entry_price
    };
    let holding_days = events.iter().map(|e| minutes_as_days((e.time - entry.entry_time).num_minutes())).sum::<Decimal>() / Decimal::from(events.len() as i64);
    let return_pct = if entry.position_size.is_zero() { Decimal::ZERO } else { net_profit / entry.position_size * dec!(100) };
    let capital_after = capital_before + net_profit;

    Ok(Ok(Trade {
        market: market.to_string(),
        entry_time: entry.entry_time,
        entry_price: entry.entry_price,
        exit_time,
        exit_price,
        take_profit_price: tp,
        stop_loss_price: sl,
        position_size: entry.position_size,
        investment_ratio: investment_ratio(entry.position_size, capital_before),
        net_profit,
        return_pct,
        capital_before,
        capital_after,
        exit_reason,
        holding_days,
        events,
        context: TradeContext {
            model: Some(prediction.model.clone()),
            strategy: None,
            confidence: Some(prediction.confidence),
            selectivity_pct: None,
            threshold: None,
        },
    }))
}

/// CUSUM-signal variant: entry at or after `signal_time`, TP/SL re-scaled
/// from the signal's reference entry to the actual resolved entry, window
/// ends at `expiration_time`, size = `capital · suggested_weight` (fallback
/// 0.8 when the weight is non-positive).
pub async fn simulate_cusum(
    candles: &dyn CandleRepository,
    market: &str,
    signal: &CusumSignal,
    capital_before: Decimal,
    last_exit_time: Option<NaiveDateTime>,
) -> anyhow::Result<SimOutcome> {
    let Some(entry_candle) = candles.find_first_at_or_after(market, signal.signal_time).await? else {
        return Ok(Err(SkipReason::NoEntryCandle));
    };
    let entry_time = entry_candle.timestamp;
    let entry_price = entry_candle.open;

    if let Some(last_exit) = last_exit_time {
        if entry_time < last_exit {
            return Ok(Err(SkipReason::Overlap));
        }
    }

    let tp_pct = (signal.take_profit_price - signal.entry_price_ref) / signal.entry_price_ref;
    let sl_pct = (signal.stop_loss_price - signal.entry_price_ref) / signal.entry_price_ref;
    let tp = entry_price * (Decimal::ONE + tp_pct);
    let sl = entry_price * (Decimal::ONE + sl_pct);

    let weight = if signal.suggested_weight > Decimal::ZERO { signal.suggested_weight } else { dec!(0.8) };
    let position_size = floor_to(capital_before * weight, 2);
    if position_size < Decimal::ONE {
        return Ok(Err(SkipReason::BelowMinUnit));
    }
    let entry_fee = ceil_to(position_size * FEE_RATE, 2);
    let quantity = floor_to((position_size - entry_fee) / entry_price, 8);

    let scan = scan_tp_sl_exit(candles, market, entry_time, signal.expiration_time, entry_price, tp, sl).await?;
    let (exit_time, exit_price, exit_reason) = match scan {
        ScanResult::Exit(t, p, r) => (t, p, r),
        ScanResult::Timeout(t, c) => (t, c, ExitReason::Timeout),
        ScanResult::Empty => return Ok(Err(SkipReason::NoCandlesInWindow)),
    };

    let proceeds = quantity * exit_price;
    let exit_fee = ceil_to(proceeds * FEE_RATE, 2);
    let net_profit = proceeds - exit_fee - position_size;
    let return_pct = if position_size.is_zero() { Decimal::ZERO } else { net_profit / position_size * dec!(100) };
    let capital_after = capital_before + net_profit;
    let holding_days = minutes_as_days((exit_time - entry_time).num_minutes());

    Ok(Ok(Trade {
        market: market.to_string(),
        entry_time,
        entry_price,
        exit_time,
        exit_price,
        take_profit_price: tp,
        stop_loss_price: sl,
        position_size,
        investment_ratio: investment_ratio(position_size, capital_before),
        net_profit,
        return_pct,
        capital_before,
        capital_after,
        exit_reason,
        holding_days,
        events: vec![ExitEvent { time: exit_time, price: exit_price, quantity, reason: exit_reason, profit: net_profit }],
        context: TradeContext {
            model: Some(signal.model.clone()),
            strategy: Some(signal.strategy.clone()),
            confidence: Some(signal.confidence),
            selectivity_pct: Some(signal.cusum_selectivity_pct),
            threshold: Some(signal.threshold),
        },
    }))
}

const RULE_BASED_FRACTION: Decimal = dec!(0.80);
const RULE_BASED_STOP_LOSS_PCT: Decimal = dec!(0.95);

/// Rule-based variant: entry/exit indices are precomputed by the
/// rule-based orchestrator over a 4-hour resampled series; this function
/// simulates one trade opened at `series[entry_index]`.
pub async fn simulate_rule_based(
    candles: &dyn CandleRepository,
    market: &str,
    series: &[Candle],
    ema20: &[Option<Decimal>],
    entry_index: usize,
    capital_before: Decimal,
    last_exit_time: Option<NaiveDateTime>,
) -> anyhow::Result<SimOutcome> {
    let entry_bar = &series[entry_index];
    let bar_start = entry_bar.timestamp;

    if let Some(last_exit) = last_exit_time {
        if bar_start < last_exit {
            return Ok(Err(SkipReason::Overlap));
        }
    }

    let entry_price = match candles.find_first_at_or_after(market, bar_start).await? {
        Some(minute_candle) if minute_candle.timestamp == bar_start => minute_candle.open,
        _ => entry_bar.open,
    };

    let position_size = floor_to(capital_before * RULE_BASED_FRACTION, 2);
    if position_size < Decimal::ONE {
        return Ok(Err(SkipReason::BelowMinUnit));
    }
    let entry_fee = ceil_to(position_size * FEE_RATE, 2);
    let quantity = floor_to((position_size - entry_fee) / entry_price, 8);

    let stop_loss_price = entry_price * RULE_BASED_STOP_LOSS_PCT;

    let mut exit: Option<(NaiveDateTime, Decimal, ExitReason)> = None;
    for j in (entry_index + 1)..series.len() {
        let bar = &series[j];
        if bar.close < stop_loss_price {
            exit = Some((bar.timestamp, stop_loss_price, ExitReason::StopLoss));
            break;
        }
        if let Some(Some(ema)) = ema20.get(j) {
            if bar.close < *ema {
                exit = Some((bar.timestamp, bar.close, ExitReason::EmaCross));
                break;
            }
        }
    }

    let (exit_time, exit_price, exit_reason) = match exit {
        Some(e) => e,
        None if series.len() > entry_index + 1 => {
            let last = series.last().expect("series.len() > entry_index + 1 implies non-empty");
            (last.timestamp, last.close, ExitReason::EndOfPeriod)
        }
        None => return Ok(Err(SkipReason::NoCandlesInWindow)),
    };

    let proceeds = quantity * exit_price;
    let exit_fee = ceil_to(proceeds * FEE_RATE, 2);
    let net_profit = proceeds - exit_fee - position_size;
    let return_pct = if position_size.is_zero() { Decimal::ZERO } else { net_profit / position_size * dec!(100) };
    let capital_after = capital_before + net_profit;
    let holding_days = minutes_as_days((exit_time - bar_start).num_minutes());

    Ok(Ok(Trade {
        market: market.to_string(),
        entry_time: bar_start,
        entry_price,
        exit_time,
        exit_price,
        // No take-profit level in this variant; never reported as the exit reason.
        take_profit_price: Decimal::ZERO,
        stop_loss_price,
        position_size,
        investment_ratio: investment_ratio(position_size, capital_before),
        net_profit,
        return_pct,
        capital_before,
        capital_after,
        exit_reason,
        holding_days,
        events: vec![ExitEvent { time: exit_time, price: exit_price, quantity, reason: exit_reason, profit: net_profit }],
        context: TradeContext::default(),
    }))
}

/// Buy-and-hold: one trade, entered at the fold's start date 09:00 and
/// closed at the fold's end date's latest available minute, full capital
/// allocation, fees on both sides.
pub async fn simulate_buy_and_hold(candles: &dyn CandleRepository, market: &str, fold: FoldConfig, capital_before: Decimal) -> anyhow::Result<SimOutcome> {
    let entry_target = fold.start.and_hms_opt(9, 0, 0).expect("09:00 is a valid time");
    let Some(entry_candle) = candles.find_first_at_or_after(market, entry_target).await? else {
        return Ok(Err(SkipReason::NoEntryCandle));
    };
    let entry_time = entry_candle.timestamp;
    let entry_price = entry_candle.open;

    let day_start = fold.end.and_hms_opt(0, 0, 0).expect("midnight is a valid time");
    let day_end = fold.end.and_hms_opt(23, 59, 0).expect("23:59 is a valid time");
    let day_candles = candles.find_range(market, day_start, day_end).await?;
    let Some(exit_candle) = day_candles.last() else {
        return Ok(Err(SkipReason::NoCandlesInWindow));
    };

    let position_size = floor_to(capital_before, 2);
    if position_size < Decimal::ONE {
        return Ok(Err(SkipReason::BelowMinUnit));
    }
    let entry_fee = ceil_to(position_size * FEE_RATE, 2);
    let quantity = floor_to((position_size - entry_fee) / entry_price, 8);

    let exit_time = exit_candle.timestamp;
    let exit_price = exit_candle.close;
    let proceeds = quantity * exit_price;
    let exit_fee = ceil_to(proceeds * FEE_RATE, 2);
    let net_profit = proceeds - exit_fee - position_size;
    let return_pct = if position_size.is_zero() { Decimal::ZERO } else { net_profit / position_size * dec!(100) };
    let capital_after = capital_before + net_profit;
    let holding_days = minutes_as_days((exit_time - entry_time).num_minutes());

    Ok(Ok(Trade {
        market: market.to_string(),
        entry_time,
        entry_price,
        exit_time,
        exit_price,
        take_profit_price: Decimal::ZERO,
        stop_loss_price: Decimal::ZERO,
        position_size,
        investment_ratio: investment_ratio(position_size, capital_before),
        net_profit,
        return_pct,
        capital_before,
        capital_after,
        exit_reason: ExitReason::EndOfPeriod,
        holding_days,
        events: vec![ExitEvent { time: exit_time, price: exit_price, quantity, reason: ExitReason::EndOfPeriod, profit: net_profit }],
        context: TradeContext::default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fold::Regime;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use futures::stream::BoxStream;

    #[derive(Default)]
    struct FakeCandleRepository {
        candles: Vec<Candle>,
    }

    impl FakeCandleRepository {
        fn new(candles: Vec<Candle>) -> Self {
            Self { candles }
        }
    }

    #[async_trait]
    impl CandleRepository for FakeCandleRepository {
        async fn find_first_at_or_after(&self, market: &str, at: NaiveDateTime) -> anyhow::Result<Option<Candle>> {
            Ok(self.candles.iter().filter(|c| c.market == market && c.timestamp >= at).min_by_key(|c| c.timestamp).cloned())
        }

        async fn find_range(&self, market: &str, start: NaiveDateTime, end: NaiveDateTime) -> anyhow::Result<Vec<Candle>> {
            let mut out: Vec<Candle> = self.candles.iter().filter(|c| c.market == market && c.timestamp >= start && c.timestamp <= end).cloned().collect();
            out.sort_by_key(|c| c.timestamp);
            Ok(out)
        }

        fn stream_range<'a>(&'a self, market: &'a str, start: NaiveDateTime, end: NaiveDateTime) -> BoxStream<'a, anyhow::Result<Candle>> {
            let mut out: Vec<Candle> = self.candles.iter().filter(|c| c.market == market && c.timestamp >= start && c.timestamp < end).cloned().collect();
            out.sort_by_key(|c| c.timestamp);
            Box::pin(futures::stream::iter(out.into_iter().map(Ok)))
        }

        async fn existing_timestamps(&self, _market: &str, _candidates: &[NaiveDateTime]) -> anyhow::Result<Vec<NaiveDateTime>> {
            unimplemented!("not exercised by simulator tests")
        }

        async fn oldest_timestamp(&self, _market: &str) -> anyhow::Result<Option<NaiveDateTime>> {
            unimplemented!("not exercised by simulator tests")
        }

        async fn insert_many(&self, _candles: &[Candle]) -> anyhow::Result<usize> {
            unimplemented!("not exercised by simulator tests")
        }
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn at_day(day_offset: i64, hour: u32, minute: u32) -> NaiveDateTime {
        at(hour, minute) + Duration::days(day_offset)
    }

    fn candle(hour: u32, minute: u32, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Candle {
        Candle::new("KRW-ETH", at(hour, minute), o, h, l, c, 1.0)
    }

    fn candle_on_day(day_offset: i64, hour: u32, minute: u32, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Candle {
        Candle::new("KRW-ETH", at_day(day_offset, hour, minute), o, h, l, c, 1.0)
    }

    fn sample_prediction() -> Prediction {
        Prediction {
            market: "KRW-ETH".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            fold: 1,
            model: "gru".to_string(),
            actual_direction: None,
            actual_return: None,
            pred_direction: "UP".to_string(),
            pred_proba_up: dec!(0.7),
            pred_proba_down: dec!(0.3),
            max_proba: dec!(0.7),
            confidence: dec!(0.2),
            take_profit_price: dec!(5150000),
            stop_loss_price: dec!(4900000),
            correct: None,
        }
    }

    #[tokio::test]
    async fn s1_immediate_take_profit() {
        let repo = FakeCandleRepository::new(vec![candle(9, 0, dec!(5000000), dec!(5200000), dec!(4950000), dec!(5100000))]);
        let trade = simulate_single_exit(&repo, "KRW-ETH", &sample_prediction(), PositionSizer::HalfKelly, dec!(10000), 8, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_eq!(trade.exit_price, dec!(5150000));
        assert!(trade.time_order_holds());
    }

    #[tokio::test]
    async fn s2_entry_candle_tie_break_favors_stop_loss_on_red_close() {
        let repo = FakeCandleRepository::new(vec![candle(9, 0, dec!(5000000), dec!(5200000), dec!(4800000), dec!(4850000))]);
        let trade = simulate_single_exit(&repo, "KRW-ETH", &sample_prediction(), PositionSizer::HalfKelly, dec!(10000), 8, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, dec!(4900000));
    }

    #[tokio::test]
    async fn s3_timeout_when_window_never_touches_tp_or_sl() {
        let repo = FakeCandleRepository::new(vec![
            candle(9, 0, dec!(5000000), dec!(5050000), dec!(4950000), dec!(5000000)),
            candle(9, 1, dec!(5000000), dec!(5050000), dec!(4950000), dec!(5000000)),
        ]);
        let trade = simulate_single_exit(&repo, "KRW-ETH", &sample_prediction(), PositionSizer::HalfKelly, dec!(10000), 8, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::Timeout);
        assert_eq!(trade.exit_price, dec!(5000000));
        assert!(trade.net_profit < Decimal::ZERO, "round-trip fees should produce a small loss");
    }

    #[tokio::test]
    async fn s4_cusum_rescales_tp_sl_to_actual_entry() {
        let signal_time = at(10, 0);
        let repo = FakeCandleRepository::new(vec![candle(10, 0, dec!(3000000), dec!(3100000), dec!(2950000), dec!(3050000))]);
        let signal = CusumSignal {
            signal_time,
            strategy: "s1".to_string(),
            model: "gru".to_string(),
            fold_id: 1,
            primary_signal: true,
            ml_prediction: 1,
            final_action: crate::domain::cusum::FinalAction::Buy,
            confidence: dec!(0.3),
            threshold: dec!(0.5),
            cusum_selectivity_pct: dec!(5.0),
            suggested_weight: dec!(0.25),
            entry_price_ref: dec!(2950000),
            take_profit_price: dec!(3000000),
            stop_loss_price: dec!(2900000),
            expiration_time: signal_time + chrono::Duration::hours(8),
            actual_direction: None,
            correct: None,
        };
        let trade = simulate_cusum(&repo, "KRW-ETH", &signal, dec!(10000), None).await.unwrap().unwrap();
        assert_eq!(trade.position_size, dec!(2500));
        // tp_pct = (3000000-2950000)/2950000, rescaled onto entry 3000000.
        assert!((trade.take_profit_price - dec!(3050847.45)).abs() < dec!(1));
        assert!((trade.stop_loss_price - dec!(2949152.54)).abs() < dec!(1));
    }

    #[tokio::test]
    async fn s5_laddered_exit_fires_levels_in_priority_order() {
        let repo = FakeCandleRepository::new(vec![
            candle_on_day(0, 9, 0, dec!(1000000), dec!(1000000), dec!(1000000), dec!(1000000)),
            candle_on_day(1, 9, 0, dec!(1000000), dec!(1060000), dec!(1000000), dec!(1060000)), // day2: +6%
            candle_on_day(3, 9, 0, dec!(1060000), dec!(1110000), dec!(1060000), dec!(1110000)), // day4: +11%
            candle_on_day(4, 9, 0, dec!(1110000), dec!(1220000), dec!(1110000), dec!(1220000)), // day5: +22%
            candle_on_day(6, 9, 0, dec!(1220000), dec!(1220000), dec!(1000000), dec!(1000000)), // day7: back to entry
        ]);
        let mut prediction = sample_prediction();
        prediction.take_profit_price = dec!(2000000); // far away, never touched
        prediction.stop_loss_price = dec!(1); // far away, never touched
        let trade = simulate_laddered_exit(&repo, "KRW-ETH", &prediction, PositionSizer::Fixed100Percent, dec!(10000), 8, None)
            .await
            .unwrap()
            .unwrap();

        let ladder_events: Vec<_> = trade.events.iter().filter(|e| e.reason == ExitReason::ProfitLadder).collect();
        assert_eq!(ladder_events.len(), 3);
        let total_qty: Decimal = trade.events.iter().map(|e| e.quantity).sum();
        // Every unit of the original position is accounted for across events.
        let original_qty = trade.position_size.checked_div(trade.entry_price).unwrap();
        assert!((total_qty - original_qty).abs() < dec!(0.001));
    }

    #[tokio::test]
    async fn s5_laddered_exit_stop_loss_always_wins_same_candle_collision() {
        // Entry candle touches both TP (5150000) and SL (4900000) and closes
        // green (5100000 >= 5000000 open) — the single-exit tie-break would
        // favor TAKE_PROFIT here, but the laddered variant must not.
        let repo = FakeCandleRepository::new(vec![candle(9, 0, dec!(5000000), dec!(5200000), dec!(4800000), dec!(5100000))]);
        let trade = simulate_laddered_exit(&repo, "KRW-ETH", &sample_prediction(), PositionSizer::HalfKelly, dec!(10000), 8, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, dec!(4900000));
    }

    #[tokio::test]
    async fn buy_and_hold_opens_and_closes_within_fold_bounds() {
        let fold = FoldConfig {
            fold: 1,
            start: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            regime: Regime::Bull,
        };
        let repo = FakeCandleRepository::new(vec![
            candle(9, 0, dec!(5000000), dec!(5000000), dec!(5000000), dec!(5000000)),
            candle(23, 58, dec!(5100000), dec!(5100000), dec!(5100000), dec!(5100000)),
        ]);
        let trade = simulate_buy_and_hold(&repo, "KRW-ETH", fold, dec!(10000)).await.unwrap().unwrap();
        assert_eq!(trade.entry_price, dec!(5000000));
        assert_eq!(trade.exit_price, dec!(5100000));
        assert_eq!(trade.exit_reason, ExitReason::EndOfPeriod);
    }

    #[tokio::test]
    async fn no_entry_candle_skips_without_error() {
        let repo = FakeCandleRepository::new(vec![]);
        let outcome = simulate_single_exit(&repo, "KRW-ETH", &sample_prediction(), PositionSizer::HalfKelly, dec!(10000), 8, None).await.unwrap();
        assert_eq!(outcome.unwrap_err(), SkipReason::NoEntryCandle);
    }

    #[tokio::test]
    async fn overlap_skips_entries_before_last_exit_time() {
        let repo = FakeCandleRepository::new(vec![candle(9, 0, dec!(5000000), dec!(5200000), dec!(4950000), dec!(5100000))]);
        let last_exit = at(12, 0);
        let outcome = simulate_single_exit(&repo, "KRW-ETH", &sample_prediction(), PositionSizer::HalfKelly, dec!(10000), 8, Some(last_exit))
            .await
            .unwrap();
        assert_eq!(outcome.unwrap_err(), SkipReason::Overlap);
    }
}
