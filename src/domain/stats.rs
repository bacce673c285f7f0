//! Backtest statistics aggregator: win rate, MDD, Sharpe, average win/loss.
//!
//! Grounded on the teacher's `domain::performance::stats::Stats`, with one
//! deliberate divergence: Sharpe here uses population standard deviation,
//! not the teacher's sample stddev — the spec is explicit on this point and
//! wins over the teacher's convention.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use super::trade::{ExitReason, Trade};

#[derive(Debug, Clone, Default)]
pub struct BacktestStats {
    pub total_trades: usize,
    pub win_count: usize,
    pub win_rate_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub sharpe: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub win_loss_ratio: Decimal,
    pub exit_reason_counts: Vec<(ExitReason, usize)>,
}

impl BacktestStats {
    pub fn from_trades(trades: &[Trade], initial_capital: Decimal) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let total_trades = trades.len();
        let win_count = trades.iter().filter(|t| t.is_win()).count();
        let win_rate_pct = Decimal::from(win_count as i64) / Decimal::from(total_trades as i64) * dec!(100);

        let max_drawdown_pct = max_drawdown(trades, initial_capital);
        let sharpe = sharpe_ratio(trades);

        let wins: Vec<Decimal> = trades.iter().filter(|t| t.net_profit > Decimal::ZERO).map(|t| t.net_profit).collect();
        let losses: Vec<Decimal> = trades.iter().filter(|t| t.net_profit < Decimal::ZERO).map(|t| t.net_profit).collect();

        let avg_win = average(&wins);
        let avg_loss = average(&losses);
        let win_loss_ratio = if avg_loss == Decimal::ZERO { Decimal::ZERO } else { avg_win / avg_loss.abs() };

        Self {
            total_trades,
            win_count,
            win_rate_pct,
            max_drawdown_pct,
            sharpe,
            avg_win,
            avg_loss,
            win_loss_ratio,
            exit_reason_counts: count_by_reason(trades),
        }
    }

    /// CUSUM's win rate excludes timeouts: `TP / (TP + SL)`. Kept separate
    /// from the generic win rate so other callers' semantics never shift.
    pub fn cusum_win_rate(trades: &[Trade]) -> Decimal {
        let tp = trades.iter().filter(|t| t.exit_reason == ExitReason::TakeProfit).count();
        let sl = trades.iter().filter(|t| t.exit_reason == ExitReason::StopLoss).count();
        let denom = tp + sl;
        if denom == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(tp as i64) / Decimal::from(denom as i64) * dec!(100)
    }
}

fn average(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as i64)
}

fn count_by_reason(trades: &[Trade]) -> Vec<(ExitReason, usize)> {
    let reasons = [
        ExitReason::TakeProfit,
        ExitReason::StopLoss,
        ExitReason::Timeout,
        ExitReason::ProfitLadder,
        ExitReason::TimeDecay,
        ExitReason::EmaCross,
        ExitReason::EndOfPeriod,
    ];
    reasons
        .into_iter()
        .map(|reason| (reason, trades.iter().filter(|t| t.exit_reason == reason).count()))
        .filter(|(_, count)| *count > 0)
        .collect()
}

/// Walk `capital_after` from `initial_capital`; peak = running max;
/// drawdown = `(peak - current) / peak * 100`; report the max observed.
fn max_drawdown(trades: &[Trade], initial_capital: Decimal) -> Decimal {
    let mut peak = initial_capital;
    let mut max_dd = Decimal::ZERO;
    for trade in trades {
        peak = peak.max(trade.capital_after);
        if peak > Decimal::ZERO {
            let dd = (peak - trade.capital_after) / peak * dec!(100);
            max_dd = max_dd.max(dd);
        }
    }
    max_dd
}

/// `mean(returnPct) / populationStdDev(returnPct)`. Returns 0 for `n < 2` or
/// stddev = 0. Risk-free rate is 0 (the spec's "simplified" Sharpe).
fn sharpe_ratio(trades: &[Trade]) -> Decimal {
    let n = trades.len();
    if n < 2 {
        return Decimal::ZERO;
    }
    let returns: Vec<Decimal> = trades.iter().map(|t| t.return_pct).collect();
    let mean = average(&returns);
    let variance = returns.iter().map(|r| (*r - mean) * (*r - mean)).sum::<Decimal>() / Decimal::from(n as i64);
    let stddev_f64 = variance.to_f64().unwrap_or(0.0).max(0.0).sqrt();
    if stddev_f64 == 0.0 {
        return Decimal::ZERO;
    }
    let stddev = Decimal::try_from(stddev_f64).unwrap_or(Decimal::ZERO);
    mean / stddev
}
