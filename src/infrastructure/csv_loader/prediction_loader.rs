//! Per-fold per-model prediction CSV loader. Fixed 11-column order:
//! `date, actualDirection, actualReturn, takeProfitPrice, stopLossPrice,
//! predDirection, predProbaUp, predProbaDown, maxProba, confidence, correct`.
//!
//! A row with a missing or unparseable numeric cell is skipped with a
//! warning rather than aborting the whole load.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use crate::domain::errors::CsvParseError;
use crate::domain::prediction::Prediction;
use crate::domain::repositories::PredictionRepository;

fn parse_optional_decimal(cell: &str) -> Option<Decimal> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        None
    } else {
        Decimal::from_str(trimmed).ok()
    }
}

fn parse_row(market: &str, fold: u32, model: &str, record: &csv::StringRecord, line: usize) -> Option<Prediction> {
    let get = |idx: usize| record.get(idx).unwrap_or("").trim();

    let date = match NaiveDate::parse_from_str(get(0), "%Y-%m-%d") {
        Ok(d) => d,
        Err(_) => {
            warn!(line, "skipping prediction row: unparseable date");
            return None;
        }
    };

    let actual_direction = {
        let cell = get(1);
        if cell.is_empty() { None } else { Some(cell.to_string()) }
    };
    let actual_return = parse_optional_decimal(get(2));

    let take_profit_price = match Decimal::from_str(get(3)) {
        Ok(v) => v,
        Err(_) => {
            warn!(line, "skipping prediction row: unparseable takeProfitPrice");
            return None;
        }
    };
    let stop_loss_price = match Decimal::from_str(get(4)) {
        Ok(v) => v,
        Err(_) => {
            warn!(line, "skipping prediction row: unparseable stopLossPrice");
            return None;
        }
    };

    let pred_direction = get(5).to_string();
    if pred_direction.is_empty() {
        warn!(line, "skipping prediction row: missing predDirection");
        return None;
    }

    let pred_proba_up = match Decimal::from_str(get(6)) {
        Ok(v) => v,
        Err(_) => {
            warn!(line, "skipping prediction row: unparseable predProbaUp");
            return None;
        }
    };
    let pred_proba_down = match Decimal::from_str(get(7)) {
        Ok(v) => v,
        Err(_) => {
            warn!(line, "skipping prediction row: unparseable predProbaDown");
            return None;
        }
    };
    let max_proba = match Decimal::from_str(get(8)) {
        Ok(v) => v,
        Err(_) => {
            warn!(line, "skipping prediction row: unparseable maxProba");
            return None;
        }
    };
    let confidence = match Decimal::from_str(get(9)) {
        Ok(v) => v,
        Err(_) => {
            warn!(line, "skipping prediction row: unparseable confidence");
            return None;
        }
    };

    let correct = match get(10) {
        "" => None,
        cell => Some(matches!(cell.to_lowercase().as_str(), "1" | "true" | "yes")),
    };

    Some(Prediction {
        market: market.to_string(),
        date,
        fold,
        model: model.to_string(),
        actual_direction,
        actual_return,
        pred_direction,
        pred_proba_up,
        pred_proba_down,
        max_proba,
        confidence,
        take_profit_price,
        stop_loss_price,
        correct,
    })
}

/// Reads the CSV at `path`, parses rows defensively, and replaces the
/// `(market, fold, model)` slice in `repo`. Returns the number of rows
/// inserted.
pub async fn load_prediction_csv(
    repo: &dyn PredictionRepository,
    path: &Path,
    market: &str,
    fold: u32,
    model: &str,
) -> anyhow::Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| CsvParseError::Open {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, source),
        })?;

    let mut predictions = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2; // header is line 1
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(line, error = %e, "skipping unreadable prediction row");
                continue;
            }
        };
        if let Some(prediction) = parse_row(market, fold, model, &record, line) {
            predictions.push(prediction);
        }
    }

    repo.replace_for_fold_model(market, fold, model, &predictions).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryPredictionRepository {
        rows: Mutex<Vec<Prediction>>,
    }

    #[async_trait]
    impl PredictionRepository for InMemoryPredictionRepository {
        async fn find_by_fold_model(&self, market: &str, fold: u32, model: &str) -> anyhow::Result<Vec<Prediction>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.market == market && p.fold == fold && p.model == model)
                .cloned()
                .collect())
        }

        async fn replace_for_fold_model(&self, market: &str, fold: u32, model: &str, predictions: &[Prediction]) -> anyhow::Result<usize> {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|p| !(p.market == market && p.fold == fold && p.model == model));
            rows.extend(predictions.iter().cloned());
            Ok(predictions.len())
        }
    }

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const HEADER: &str = "date,actualDirection,actualReturn,takeProfitPrice,stopLossPrice,predDirection,predProbaUp,predProbaDown,maxProba,confidence,correct\n";

    #[tokio::test]
    async fn loads_well_formed_rows() {
        let body = format!("{HEADER}2024-01-15,UP,0.012,5150000,4900000,UP,0.7,0.3,0.7,0.2,1\n");
        let file = write_csv(&body);
        let repo = InMemoryPredictionRepository::default();
        let inserted = load_prediction_csv(&repo, file.path(), "KRW-ETH", 1, "gru").await.unwrap();
        assert_eq!(inserted, 1);
        let rows = repo.find_by_fold_model("KRW-ETH", 1, "gru").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pred_direction, "UP");
    }

    #[tokio::test]
    async fn skips_rows_with_unparseable_numeric_cells_without_aborting() {
        let body = format!(
            "{HEADER}2024-01-15,UP,0.012,not_a_number,4900000,UP,0.7,0.3,0.7,0.2,1\n\
             2024-01-16,DOWN,-0.01,5100000,4950000,DOWN,0.4,0.6,0.6,0.3,0\n"
        );
        let file = write_csv(&body);
        let repo = InMemoryPredictionRepository::default();
        let inserted = load_prediction_csv(&repo, file.path(), "KRW-ETH", 1, "gru").await.unwrap();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn reload_is_idempotent_for_same_fold_model() {
        let body = format!("{HEADER}2024-01-15,UP,0.012,5150000,4900000,UP,0.7,0.3,0.7,0.2,1\n");
        let file = write_csv(&body);
        let repo = InMemoryPredictionRepository::default();
        load_prediction_csv(&repo, file.path(), "KRW-ETH", 1, "gru").await.unwrap();
        load_prediction_csv(&repo, file.path(), "KRW-ETH", 1, "gru").await.unwrap();
        let rows = repo.find_by_fold_model("KRW-ETH", 1, "gru").await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
