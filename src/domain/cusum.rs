//! CUSUM-filtered event signal and its process-lifetime in-memory cache.
//!
//! Loaded once from a master CSV at startup (see
//! `infrastructure::csv_loader::cusum_loader`) and held read-only
//! thereafter; a `reload()` atomically replaces the cached vector so
//! readers never observe a half-loaded state.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalAction {
    Buy,
    Pass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CusumSignal {
    pub signal_time: NaiveDateTime,
    pub strategy: String,
    pub model: String,
    pub fold_id: u32,
    pub primary_signal: bool,
    pub ml_prediction: u8,
    pub final_action: FinalAction,
    pub confidence: Decimal,
    pub threshold: Decimal,
    pub cusum_selectivity_pct: Decimal,
    pub suggested_weight: Decimal,
    pub entry_price_ref: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    pub expiration_time: NaiveDateTime,
    pub actual_direction: Option<String>,
    pub correct: Option<bool>,
}

impl CusumSignal {
    pub fn is_buy(&self) -> bool {
        matches!(self.final_action, FinalAction::Buy)
    }

    /// `expirationTime > signalTime`.
    pub fn expiration_after_signal(&self) -> bool {
        self.expiration_time > self.signal_time
    }
}

#[derive(Debug, Default)]
pub struct CusumSummary {
    pub total_buy: usize,
    pub correct_buy: usize,
    pub overall_accuracy: Option<Decimal>,
    pub by_strategy: Vec<(String, usize)>,
    pub by_model: Vec<(String, usize)>,
    pub by_fold: Vec<(u32, usize)>,
}

/// Process-lifetime cache of CUSUM signals, guarded by a `RwLock` so reads
/// never block on each other and a reload is a single atomic swap.
pub struct CusumSignalStore {
    signals: RwLock<Vec<CusumSignal>>,
}

impl CusumSignalStore {
    pub fn new(signals: Vec<CusumSignal>) -> Self {
        Self {
            signals: RwLock::new(signals),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Atomically replace the cached vector.
    pub fn reload(&self, signals: Vec<CusumSignal>) {
        *self.signals.write().expect("cusum store lock poisoned") = signals;
    }

    pub fn len(&self) -> usize {
        self.signals.read().expect("cusum store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buy_signals(&self) -> Vec<CusumSignal> {
        self.signals
            .read()
            .expect("cusum store lock poisoned")
            .iter()
            .filter(|s| s.is_buy())
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<CusumSignal> {
        self.signals.read().expect("cusum store lock poisoned").clone()
    }

    pub fn distinct_strategies(&self) -> Vec<String> {
        let guard = self.signals.read().expect("cusum store lock poisoned");
        let set: BTreeSet<&str> = guard.iter().map(|s| s.strategy.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    pub fn distinct_models(&self) -> Vec<String> {
        let guard = self.signals.read().expect("cusum store lock poisoned");
        let set: BTreeSet<&str> = guard.iter().map(|s| s.model.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    pub fn distinct_folds(&self) -> Vec<u32> {
        let guard = self.signals.read().expect("cusum store lock poisoned");
        let set: BTreeSet<u32> = guard.iter().map(|s| s.fold_id).collect();
        set.into_iter().collect()
    }

    /// `(earliest signal_time, latest signal_time)`, or `None` if the cache
    /// is empty.
    pub fn date_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let guard = self.signals.read().expect("cusum store lock poisoned");
        let min = guard.iter().map(|s| s.signal_time).min()?;
        let max = guard.iter().map(|s| s.signal_time).max()?;
        Some((min, max))
    }

    pub fn summary(&self) -> CusumSummary {
        let buys = self.buy_signals();
        let total_buy = buys.len();
        let correct_buy = buys.iter().filter(|s| s.correct == Some(true)).count();
        let overall_accuracy = if total_buy > 0 {
            Some(Decimal::from(correct_buy as i64) / Decimal::from(total_buy as i64) * Decimal::from(100))
        } else {
            None
        };

        let mut by_strategy: Vec<(String, usize)> = Vec::new();
        let mut by_model: Vec<(String, usize)> = Vec::new();
        let mut by_fold: Vec<(u32, usize)> = Vec::new();

        for signal in &buys {
            bump(&mut by_strategy, signal.strategy.clone());
            bump(&mut by_model, signal.model.clone());
            bump_u32(&mut by_fold, signal.fold_id);
        }

        CusumSummary {
            total_buy,
            correct_buy,
            overall_accuracy,
            by_strategy,
            by_model,
            by_fold,
        }
    }
}

fn bump(counts: &mut Vec<(String, usize)>, key: String) {
    match counts.iter_mut().find(|(k, _)| *k == key) {
        Some((_, count)) => *count += 1,
        None => counts.push((key, 1)),
    }
}

fn bump_u32(counts: &mut Vec<(u32, usize)>, key: u32) {
    match counts.iter_mut().find(|(k, _)| *k == key) {
        Some((_, count)) => *count += 1,
        None => counts.push((key, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn signal(strategy: &str, model: &str, fold: u32, action: FinalAction, correct: Option<bool>) -> CusumSignal {
        let t = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        CusumSignal {
            signal_time: t,
            strategy: strategy.to_string(),
            model: model.to_string(),
            fold_id: fold,
            primary_signal: true,
            ml_prediction: 1,
            final_action: action,
            confidence: dec!(0.3),
            threshold: dec!(0.5),
            cusum_selectivity_pct: dec!(5.0),
            suggested_weight: dec!(0.25),
            entry_price_ref: dec!(2950000),
            take_profit_price: dec!(3000000),
            stop_loss_price: dec!(2900000),
            expiration_time: t + chrono::Duration::hours(8),
            actual_direction: Some("UP".to_string()),
            correct,
        }
    }

    #[test]
    fn buy_signals_excludes_pass() {
        let store = CusumSignalStore::new(vec![
            signal("s1", "m1", 1, FinalAction::Buy, Some(true)),
            signal("s1", "m1", 1, FinalAction::Pass, None),
        ]);
        assert_eq!(store.buy_signals().len(), 1);
    }

    #[test]
    fn reload_replaces_atomically() {
        let store = CusumSignalStore::new(vec![signal("s1", "m1", 1, FinalAction::Buy, Some(true))]);
        store.reload(vec![
            signal("s2", "m2", 2, FinalAction::Buy, Some(false)),
            signal("s2", "m2", 2, FinalAction::Buy, Some(true)),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.distinct_strategies(), vec!["s2".to_string()]);
    }

    #[test]
    fn summary_computes_overall_accuracy() {
        let store = CusumSignalStore::new(vec![
            signal("s1", "m1", 1, FinalAction::Buy, Some(true)),
            signal("s1", "m1", 1, FinalAction::Buy, Some(false)),
        ]);
        let summary = store.summary();
        assert_eq!(summary.total_buy, 2);
        assert_eq!(summary.correct_buy, 1);
        assert_eq!(summary.overall_accuracy, Some(dec!(50)));
    }

    #[test]
    fn empty_store_summary_has_no_accuracy() {
        let store = CusumSignalStore::empty();
        assert_eq!(store.summary().overall_accuracy, None);
        assert_eq!(store.date_range(), None);
    }

    #[test]
    fn expiration_must_be_after_signal_time() {
        let mut s = signal("s1", "m1", 1, FinalAction::Buy, None);
        assert!(s.expiration_after_signal());
        s.expiration_time = s.signal_time;
        assert!(!s.expiration_after_signal());
    }
}
