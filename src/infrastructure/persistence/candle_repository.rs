//! `sqlx`-backed `CandleRepository`. `stream_range` hands back a
//! `futures::stream::BoxStream` wrapping `sqlx`'s native streaming cursor —
//! rows are never materialized into a `Vec`, so a million-row candle corpus
//! never has to fit in memory; the cursor is released when the stream is
//! dropped (exhaustion, early break, or error).

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone};
use futures::stream::{BoxStream, StreamExt};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;

use crate::domain::candle::Candle;
use crate::domain::repositories::CandleRepository;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    Ok(NaiveDateTime::parse_from_str(s, TS_FORMAT)?)
}

fn row_to_candle(row: &SqliteRow) -> anyhow::Result<Candle> {
    let timestamp: String = row.try_get("timestamp")?;
    let open: String = row.try_get("open")?;
    let high: String = row.try_get("high")?;
    let low: String = row.try_get("low")?;
    let close: String = row.try_get("close")?;
    Ok(Candle {
        market: row.try_get("market")?,
        timestamp: parse_ts(&timestamp)?,
        open: Decimal::from_str(&open)?,
        high: Decimal::from_str(&high)?,
        low: Decimal::from_str(&low)?,
        close: Decimal::from_str(&close)?,
        volume: row.try_get("volume")?,
    })
}

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn find_first_at_or_after(&self, market: &str, at: NaiveDateTime) -> anyhow::Result<Option<Candle>> {
        let row = sqlx::query(
            "SELECT market, timestamp, open, high, low, close, volume FROM historical_minute_ohlcv
             WHERE market = ?1 AND timestamp >= ?2 ORDER BY timestamp ASC LIMIT 1",
        )
        .bind(market)
        .bind(fmt_ts(at))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_candle).transpose()
    }

    async fn find_range(&self, market: &str, start: NaiveDateTime, end: NaiveDateTime) -> anyhow::Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT market, timestamp, open, high, low, close, volume FROM historical_minute_ohlcv
             WHERE market = ?1 AND timestamp >= ?2 AND timestamp <= ?3 ORDER BY timestamp ASC",
        )
        .bind(market)
        .bind(fmt_ts(start))
        .bind(fmt_ts(end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_candle).collect()
    }

    fn stream_range<'a>(&'a self, market: &'a str, start: NaiveDateTime, end: NaiveDateTime) -> BoxStream<'a, anyhow::Result<Candle>> {
        let pool = self.pool.clone();
        let market = market.to_string();
        let start = fmt_ts(start);
        let end = fmt_ts(end);

        let stream = async_stream::try_stream! {
            let mut rows = sqlx::query(
                "SELECT market, timestamp, open, high, low, close, volume FROM historical_minute_ohlcv
                 WHERE market = ?1 AND timestamp >= ?2 AND timestamp < ?3 ORDER BY timestamp ASC",
            )
            .bind(market)
            .bind(start)
            .bind(end)
            .fetch(&pool);

            while let Some(row) = rows.next().await {
                let row = row?;
                yield row_to_candle(&row)?;
            }
        };

        Box::pin(stream)
    }

    async fn existing_timestamps(&self, market: &str, candidates: &[NaiveDateTime]) -> anyhow::Result<Vec<NaiveDateTime>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let min = candidates.iter().min().copied().unwrap();
        let max = candidates.iter().max().copied().unwrap();
        let rows = sqlx::query("SELECT timestamp FROM historical_minute_ohlcv WHERE market = ?1 AND timestamp >= ?2 AND timestamp <= ?3")
            .bind(market)
            .bind(fmt_ts(min))
            .bind(fmt_ts(max))
            .fetch_all(&self.pool)
            .await?;

        let existing: std::collections::HashSet<NaiveDateTime> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("timestamp").unwrap())
            .filter_map(|s| parse_ts(&s).ok())
            .collect();

        Ok(candidates.iter().copied().filter(|c| existing.contains(c)).collect())
    }

    async fn oldest_timestamp(&self, market: &str) -> anyhow::Result<Option<NaiveDateTime>> {
        let row = sqlx::query("SELECT MIN(timestamp) as ts FROM historical_minute_ohlcv WHERE market = ?1")
            .bind(market)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let ts: Option<String> = row.try_get("ts")?;
                ts.map(|s| parse_ts(&s)).transpose()
            }
            None => Ok(None),
        }
    }

    async fn insert_many(&self, candles: &[Candle]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for candle in candles {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO historical_minute_ohlcv (market, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&candle.market)
            .bind(fmt_ts(candle.timestamp))
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

/// Usable as a UTC anchor when the ingestion pipeline needs to format a
/// cursor for the exchange API's `to=` parameter; domain timestamps
/// otherwise stay in local wall-clock time throughout the repository layer.
pub fn naive_to_utc(ts: NaiveDateTime) -> chrono::DateTime<chrono::Utc> {
    chrono::Utc.from_utc_datetime(&ts)
}
