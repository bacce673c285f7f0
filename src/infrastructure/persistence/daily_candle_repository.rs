//! `sqlx`-backed `DailyCandleRepository` over `historical_ohlcv`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;

use crate::domain::candle::Candle;
use crate::domain::repositories::DailyCandleRepository;

fn row_to_candle(row: &SqliteRow) -> anyhow::Result<Candle> {
    let timestamp: String = row.try_get("timestamp")?;
    let open: String = row.try_get("open")?;
    let high: String = row.try_get("high")?;
    let low: String = row.try_get("low")?;
    let close: String = row.try_get("close")?;
    Ok(Candle {
        market: row.try_get("market")?,
        timestamp: NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%d %H:%M:%S")?,
        open: Decimal::from_str(&open)?,
        high: Decimal::from_str(&high)?,
        low: Decimal::from_str(&low)?,
        close: Decimal::from_str(&close)?,
        volume: row.try_get("volume")?,
    })
}

pub struct SqliteDailyCandleRepository {
    pool: SqlitePool,
}

impl SqliteDailyCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DailyCandleRepository for SqliteDailyCandleRepository {
    async fn find_by_date(&self, market: &str, date: NaiveDate) -> anyhow::Result<Option<Candle>> {
        let start = date.and_hms_opt(0, 0, 0).unwrap();
        let end = date.succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap();

        let row = sqlx::query(
            "SELECT market, timestamp, open, high, low, close, volume FROM historical_ohlcv
             WHERE market = ?1 AND timestamp >= ?2 AND timestamp < ?3 ORDER BY timestamp ASC LIMIT 1",
        )
        .bind(market)
        .bind(start.format("%Y-%m-%d %H:%M:%S").to_string())
        .bind(end.format("%Y-%m-%d %H:%M:%S").to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_candle).transpose()
    }

    async fn find_range(&self, market: &str, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<Candle>> {
        let start_ts = start.and_hms_opt(0, 0, 0).unwrap();
        let end_ts = end.and_hms_opt(23, 59, 59).unwrap();

        let rows = sqlx::query(
            "SELECT market, timestamp, open, high, low, close, volume FROM historical_ohlcv
             WHERE market = ?1 AND timestamp >= ?2 AND timestamp <= ?3 ORDER BY timestamp ASC",
        )
        .bind(market)
        .bind(start_ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .bind(end_ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_candle).collect()
    }

    async fn insert_many(&self, candles: &[Candle]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for candle in candles {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO historical_ohlcv (market, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&candle.market)
            .bind(candle.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }
}
