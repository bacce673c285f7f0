//! `sqlx`-backed `PredictionRepository` over `historical_ai_predictions`.
//! `replace_for_fold_model` deletes then reinserts inside one transaction so
//! re-loading the same CSV twice is idempotent.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;

use crate::domain::prediction::Prediction;
use crate::domain::repositories::PredictionRepository;

fn row_to_prediction(row: &SqliteRow) -> anyhow::Result<Prediction> {
    let date: String = row.try_get("date")?;
    let actual_return: Option<String> = row.try_get("actual_return")?;
    let pred_proba_up: String = row.try_get("pred_proba_up")?;
    let pred_proba_down: String = row.try_get("pred_proba_down")?;
    let max_proba: String = row.try_get("max_proba")?;
    let confidence: String = row.try_get("confidence")?;
    let take_profit_price: String = row.try_get("take_profit_price")?;
    let stop_loss_price: String = row.try_get("stop_loss_price")?;
    let correct: Option<i64> = row.try_get("correct")?;

    Ok(Prediction {
        market: row.try_get("market")?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")?,
        fold: row.try_get::<i64, _>("fold")? as u32,
        model: row.try_get("model")?,
        actual_direction: row.try_get("actual_direction")?,
        actual_return: actual_return.map(|s| Decimal::from_str(&s)).transpose()?,
        pred_direction: row.try_get("pred_direction")?,
        pred_proba_up: Decimal::from_str(&pred_proba_up)?,
        pred_proba_down: Decimal::from_str(&pred_proba_down)?,
        max_proba: Decimal::from_str(&max_proba)?,
        confidence: Decimal::from_str(&confidence)?,
        take_profit_price: Decimal::from_str(&take_profit_price)?,
        stop_loss_price: Decimal::from_str(&stop_loss_price)?,
        correct: correct.map(|v| v != 0),
    })
}

pub struct SqlitePredictionRepository {
    pool: SqlitePool,
}

impl SqlitePredictionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PredictionRepository for SqlitePredictionRepository {
    async fn find_by_fold_model(&self, market: &str, fold: u32, model: &str) -> anyhow::Result<Vec<Prediction>> {
        let rows = sqlx::query(
            "SELECT market, date, fold, model, actual_direction, actual_return, pred_direction,
                    pred_proba_up, pred_proba_down, max_proba, confidence, take_profit_price,
                    stop_loss_price, correct
             FROM historical_ai_predictions
             WHERE market = ?1 AND fold = ?2 AND model = ?3
             ORDER BY date ASC",
        )
        .bind(market)
        .bind(fold)
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_prediction).collect()
    }

    async fn replace_for_fold_model(&self, market: &str, fold: u32, model: &str, predictions: &[Prediction]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM historical_ai_predictions WHERE market = ?1 AND fold = ?2 AND model = ?3")
            .bind(market)
            .bind(fold)
            .bind(model)
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0usize;
        for prediction in predictions {
            sqlx::query(
                "INSERT INTO historical_ai_predictions
                    (market, date, fold, model, actual_direction, actual_return, pred_direction,
                     pred_proba_up, pred_proba_down, max_proba, confidence, take_profit_price,
                     stop_loss_price, correct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )
            .bind(&prediction.market)
            .bind(prediction.date.format("%Y-%m-%d").to_string())
            .bind(prediction.fold)
            .bind(&prediction.model)
            .bind(&prediction.actual_direction)
            .bind(prediction.actual_return.map(|v| v.to_string()))
            .bind(&prediction.pred_direction)
            .bind(prediction.pred_proba_up.to_string())
            .bind(prediction.pred_proba_down.to_string())
            .bind(prediction.max_proba.to_string())
            .bind(prediction.confidence.to_string())
            .bind(prediction.take_profit_price.to_string())
            .bind(prediction.stop_loss_price.to_string())
            .bind(prediction.correct.map(|v| v as i64))
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        tx.commit().await?;
        Ok(inserted)
    }
}
