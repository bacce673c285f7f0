//! Static walk-forward fold definitions: 8 contiguous out-of-sample windows,
//! 1-7 chained and 8 a final holdout. Read-only, compiled in.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
    Mixed,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Regime::Bull => "BULL",
            Regime::Bear => "BEAR",
            Regime::Sideways => "SIDEWAYS",
            Regime::Mixed => "MIXED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FoldConfig {
    pub fold: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub regime: Regime,
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).expect("static fold boundary is a valid date")
}

/// The 8 compiled-in folds. Boundaries are contiguous: each fold's start is
/// the day after the previous fold's end.
pub fn all_folds() -> [FoldConfig; 8] {
    [
        FoldConfig { fold: 1, start: d(2022, 1, 1), end: d(2022, 4, 30), regime: Regime::Bear },
        FoldConfig { fold: 2, start: d(2022, 5, 1), end: d(2022, 8, 31), regime: Regime::Bear },
        FoldConfig { fold: 3, start: d(2022, 9, 1), end: d(2022, 12, 31), regime: Regime::Sideways },
        FoldConfig { fold: 4, start: d(2023, 1, 1), end: d(2023, 4, 30), regime: Regime::Sideways },
        FoldConfig { fold: 5, start: d(2023, 5, 1), end: d(2023, 8, 31), regime: Regime::Mixed },
        FoldConfig { fold: 6, start: d(2023, 9, 1), end: d(2023, 12, 31), regime: Regime::Bull },
        FoldConfig { fold: 7, start: d(2024, 1, 1), end: d(2024, 4, 30), regime: Regime::Bull },
        FoldConfig { fold: 8, start: d(2024, 5, 1), end: d(2024, 8, 31), regime: Regime::Mixed },
    ]
}

pub fn fold_by_number(fold: u32) -> Option<FoldConfig> {
    all_folds().into_iter().find(|f| f.fold == fold)
}

pub const MIN_FOLD: u32 = 1;
pub const MAX_FOLD: u32 = 8;
