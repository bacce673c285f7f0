//! CUSUM master CSV loader. Column lookup is header-driven and
//! case-insensitive, with a data-driven alias table so a renamed upstream
//! column is a config change rather than a code change. Accepts a UTF-8 BOM
//! on the first header cell.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use crate::domain::cusum::{CusumSignal, FinalAction};
use crate::domain::errors::CsvParseError;

const BOM: char = '\u{feff}';

/// `(canonical name, accepted aliases)`. The canonical name is always tried
/// first; the legacy columns listed alongside it are from earlier revisions
/// of the upstream signal exporter.
const COLUMN_ALIASES: &[(&str, &[&str])] = &[
    ("signal_time", &["signaltime", "ts", "timestamp"]),
    ("strategy", &["strategy_name", "strat"]),
    ("model", &["model_name", "model_id"]),
    ("fold_id", &["fold", "fold_number"]),
    ("primary_signal", &["is_primary", "primary"]),
    ("ml_prediction", &["ml_pred", "prediction"]),
    ("final_action", &["action", "decision"]),
    ("confidence", &["conf"]),
    ("threshold", &["thresh"]),
    ("cusum_selectivity_pct", &["selectivity_pct", "selectivity"]),
    ("suggested_weight", &["weight", "position_weight"]),
    ("entry_price_ref", &["entry_price", "ref_price"]),
    ("take_profit_price", &["tp_price", "take_profit"]),
    ("stop_loss_price", &["sl_price", "stop_loss"]),
    ("expiration_time", &["expires_at", "expiry"]),
    ("actual_direction", &["direction", "actual_dir"]),
    ("correct", &["is_correct"]),
];

struct ColumnIndex {
    positions: std::collections::HashMap<&'static str, usize>,
}

impl ColumnIndex {
    fn build(headers: &csv::StringRecord, path: &Path) -> Result<Self, CsvParseError> {
        let normalized: Vec<String> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let cleaned = if i == 0 { h.trim_start_matches(BOM) } else { h };
                cleaned.trim().to_lowercase()
            })
            .collect();

        let mut positions = std::collections::HashMap::new();
        for (canonical, aliases) in COLUMN_ALIASES {
            let mut found = None;
            for (idx, header) in normalized.iter().enumerate() {
                if header == canonical || aliases.iter().any(|a| a == header) {
                    found = Some(idx);
                    break;
                }
            }
            match found {
                Some(idx) => {
                    positions.insert(*canonical, idx);
                }
                None => {
                    return Err(CsvParseError::MissingColumn {
                        path: path.display().to_string(),
                        column: canonical.to_string(),
                    });
                }
            }
        }

        Ok(Self { positions })
    }

    fn get<'a>(&self, record: &'a csv::StringRecord, canonical: &str) -> &'a str {
        self.positions
            .get(canonical)
            .and_then(|idx| record.get(*idx))
            .unwrap_or("")
            .trim()
    }
}

fn parse_bool_cell(cell: &str) -> bool {
    matches!(cell.to_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_row(index: &ColumnIndex, record: &csv::StringRecord, line: usize) -> Option<CusumSignal> {
    let signal_time = match NaiveDateTime::parse_from_str(index.get(record, "signal_time"), "%Y-%m-%d %H:%M:%S") {
        Ok(t) => t,
        Err(_) => {
            warn!(line, "skipping cusum row: unparseable signal_time");
            return None;
        }
    };

    let expiration_time = match NaiveDateTime::parse_from_str(index.get(record, "expiration_time"), "%Y-%m-%d %H:%M:%S") {
        Ok(t) => t,
        Err(_) => {
            warn!(line, "skipping cusum row: unparseable expiration_time");
            return None;
        }
    };

    let final_action = match index.get(record, "final_action").to_uppercase().as_str() {
        "BUY" => FinalAction::Buy,
        "PASS" => FinalAction::Pass,
        other => {
            warn!(line, action = other, "skipping cusum row: unknown final_action");
            return None;
        }
    };

    macro_rules! decimal_cell {
        ($col:literal) => {
            match Decimal::from_str(index.get(record, $col)) {
                Ok(v) => v,
                Err(_) => {
                    warn!(line, column = $col, "skipping cusum row: unparseable decimal");
                    return None;
                }
            }
        };
    }

    let confidence = decimal_cell!("confidence");
    let threshold = decimal_cell!("threshold");
    let cusum_selectivity_pct = decimal_cell!("cusum_selectivity_pct");
    let suggested_weight = decimal_cell!("suggested_weight");
    let entry_price_ref = decimal_cell!("entry_price_ref");
    let take_profit_price = decimal_cell!("take_profit_price");
    let stop_loss_price = decimal_cell!("stop_loss_price");

    let fold_id: u32 = match index.get(record, "fold_id").parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(line, "skipping cusum row: unparseable fold_id");
            return None;
        }
    };

    let ml_prediction: u8 = index.get(record, "ml_prediction").parse().unwrap_or(0);
    let primary_signal = parse_bool_cell(index.get(record, "primary_signal"));

    let actual_direction_cell = index.get(record, "actual_direction");
    let actual_direction = if actual_direction_cell.is_empty() {
        None
    } else {
        Some(actual_direction_cell.to_string())
    };

    let correct_cell = index.get(record, "correct");
    let correct = if correct_cell.is_empty() { None } else { Some(parse_bool_cell(correct_cell)) };

    Some(CusumSignal {
        signal_time,
        strategy: index.get(record, "strategy").to_string(),
        model: index.get(record, "model").to_string(),
        fold_id,
        primary_signal,
        ml_prediction,
        final_action,
        confidence,
        threshold,
        cusum_selectivity_pct,
        suggested_weight,
        entry_price_ref,
        take_profit_price,
        stop_loss_price,
        expiration_time,
        actual_direction,
        correct,
    })
}

pub fn load_cusum_csv(path: &Path) -> Result<Vec<CusumSignal>, CsvParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| CsvParseError::Open {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, source),
        })?;

    let headers = reader
        .headers()
        .map_err(|source| CsvParseError::Open {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, source),
        })?
        .clone();
    let index = ColumnIndex::build(&headers, path)?;

    let mut signals = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(line, error = %e, "skipping unreadable cusum row");
                continue;
            }
        };
        if let Some(signal) = parse_row(&index, &record, line) {
            signals.push(signal);
        }
    }

    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const CANONICAL_HEADER: &str = "signal_time,strategy,model,fold_id,primary_signal,ml_prediction,final_action,confidence,threshold,cusum_selectivity_pct,suggested_weight,entry_price_ref,take_profit_price,stop_loss_price,expiration_time,actual_direction,correct\n";

    #[test]
    fn loads_buy_row_with_canonical_headers() {
        let body = format!(
            "{CANONICAL_HEADER}2024-01-15 10:00:00,trend_follow,gru,1,1,1,BUY,0.7,0.5,5.0,0.25,2950000,3000000,2900000,2024-01-15 18:00:00,UP,1\n"
        );
        let file = write_csv(&body);
        let signals = load_cusum_csv(file.path()).unwrap();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].is_buy());
        assert_eq!(signals[0].strategy, "trend_follow");
    }

    #[test]
    fn accepts_legacy_column_aliases() {
        let header = "ts,strat,model_name,fold,is_primary,ml_pred,action,conf,thresh,selectivity_pct,weight,entry_price,tp_price,sl_price,expires_at,direction,is_correct\n";
        let body = format!("{header}2024-01-15 10:00:00,trend_follow,gru,1,1,1,BUY,0.7,0.5,5.0,0.25,2950000,3000000,2900000,2024-01-15 18:00:00,UP,1\n");
        let file = write_csv(&body);
        let signals = load_cusum_csv(file.path()).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].model, "gru");
    }

    #[test]
    fn strips_utf8_bom_from_first_header_cell() {
        let body = format!("\u{feff}{CANONICAL_HEADER}2024-01-15 10:00:00,s,m,1,1,1,PASS,0.3,0.5,5.0,0.1,2950000,3000000,2900000,2024-01-15 18:00:00,,\n");
        let file = write_csv(&body);
        let signals = load_cusum_csv(file.path()).unwrap();
        assert_eq!(signals.len(), 1);
        assert!(!signals[0].is_buy());
    }

    #[test]
    fn skips_row_with_unparseable_decimal_without_aborting_load() {
        let body = format!(
            "{CANONICAL_HEADER}2024-01-15 10:00:00,s,m,1,1,1,BUY,not_a_number,0.5,5.0,0.25,2950000,3000000,2900000,2024-01-15 18:00:00,UP,1\n\
             2024-01-16 10:00:00,s,m,1,1,1,BUY,0.7,0.5,5.0,0.25,2950000,3000000,2900000,2024-01-16 18:00:00,UP,1\n"
        );
        let file = write_csv(&body);
        let signals = load_cusum_csv(file.path()).unwrap();
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn missing_required_column_is_a_hard_error() {
        let body = "strategy,model\ns,m\n".to_string();
        let file = write_csv(&body);
        let err = load_cusum_csv(file.path()).unwrap_err();
        assert!(matches!(err, CsvParseError::MissingColumn { .. }));
    }
}
