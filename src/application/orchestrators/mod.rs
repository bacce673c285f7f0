//! Orchestrators drive the per-trade simulator across a fold (or a chain of
//! folds), own the running capital/overlap cursor, and fold the resulting
//! trades into a `BacktestReport`. The simulator never sees more than one
//! signal at a time; these modules are where "backtest a fold" lives.

pub mod buy_and_hold;
pub mod cusum;
pub mod rule_based;
pub mod sequential;
pub mod tp_sl;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::indicators::quantile;
use crate::domain::stats::BacktestStats;
use crate::domain::trade::{SkipReason, Trade};

/// Result of running one orchestrator over one `(market, fold, model?)`
/// scope: every produced trade, every skip with its reason, and the
/// aggregated statistics built from the trades alone.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub market: String,
    pub fold: u32,
    pub model: Option<String>,
    pub strategy: Option<String>,
    pub trades: Vec<Trade>,
    pub skipped: Vec<SkipReason>,
    pub stats: BacktestStats,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    /// `(final_capital - initial_capital) / initial_capital * 100`.
    pub total_return_pct: Decimal,
    /// Mean of `Trade::holding_days` across every trade; 0 when there are none.
    pub average_holding_days: Decimal,
    /// Earliest trade entry date to latest trade exit date; `None` when the
    /// report has no trades.
    pub period: Option<(NaiveDate, NaiveDate)>,
}

impl BacktestReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: impl Into<String>,
        fold: u32,
        model: Option<String>,
        strategy: Option<String>,
        trades: Vec<Trade>,
        skipped: Vec<SkipReason>,
        initial_capital: Decimal,
        final_capital: Decimal,
    ) -> Self {
        let stats = BacktestStats::from_trades(&trades, initial_capital);
        let total_return_pct = if initial_capital.is_zero() {
            Decimal::ZERO
        } else {
            (final_capital - initial_capital) / initial_capital * Decimal::from(100)
        };
        let average_holding_days = if trades.is_empty() {
            Decimal::ZERO
        } else {
            trades.iter().map(|t| t.holding_days).sum::<Decimal>() / Decimal::from(trades.len() as i64)
        };
        let period = trades
            .iter()
            .map(|t| t.entry_time.date())
            .min()
            .zip(trades.iter().map(|t| t.exit_time.date()).max());

        Self {
            market: market.into(),
            fold,
            model,
            strategy,
            trades,
            skipped,
            stats,
            initial_capital,
            final_capital,
            total_return_pct,
            average_holding_days,
            period,
        }
    }
}

/// How a TP/SL-style threshold is resolved for a run: a literal price/percent
/// fixed ahead of time, or a quantile computed from the run's own history.
#[derive(Debug, Clone, Copy)]
pub enum ThresholdMode {
    Fixed(Decimal),
    Quantile(Decimal),
}

/// Resolves a `ThresholdMode` against the historical series it's quantiled
/// over. `Quantile` falls back to 0 when the series is empty — callers that
/// can't tolerate that should check `historical.is_empty()` first.
pub fn resolve_threshold(mode: ThresholdMode, historical: &[Decimal]) -> Decimal {
    match mode {
        ThresholdMode::Fixed(value) => value,
        ThresholdMode::Quantile(q) => quantile(historical, q).unwrap_or(Decimal::ZERO),
    }
}
