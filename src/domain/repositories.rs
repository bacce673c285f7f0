//! Repository capability traits. Hand-written query methods replace the
//! reflection-based ORM style the teacher otherwise favors in its
//! `InMemoryPortfolioRepository`/`InMemoryTradeRepository` pair — here every
//! implementation is `sqlx`-backed (see `infrastructure::persistence`).

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::candle::Candle;
use super::prediction::Prediction;

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// First minute candle with `timestamp ≥ at`.
    async fn find_first_at_or_after(&self, market: &str, at: NaiveDateTime) -> anyhow::Result<Option<Candle>>;

    /// Ascending-ordered candles in `[start, end]`. Bounded — callers that
    /// might exceed memory should use `stream_range` instead.
    async fn find_range(&self, market: &str, start: NaiveDateTime, end: NaiveDateTime) -> anyhow::Result<Vec<Candle>>;

    /// Lazy, forward-only stream over `[start, end)`. The cursor is released
    /// when the stream is dropped — on exhaustion, an early break, or error.
    fn stream_range<'a>(&'a self, market: &'a str, start: NaiveDateTime, end: NaiveDateTime) -> BoxStream<'a, anyhow::Result<Candle>>;

    /// Timestamps out of `candidates` that already exist in the store, used
    /// by the ingestion pipeline's dedup pass.
    async fn existing_timestamps(&self, market: &str, candidates: &[NaiveDateTime]) -> anyhow::Result<Vec<NaiveDateTime>>;

    /// Oldest stored timestamp for `market`, if any rows exist yet.
    async fn oldest_timestamp(&self, market: &str) -> anyhow::Result<Option<NaiveDateTime>>;

    async fn insert_many(&self, candles: &[Candle]) -> anyhow::Result<usize>;
}

#[async_trait]
pub trait DailyCandleRepository: Send + Sync {
    async fn find_by_date(&self, market: &str, date: NaiveDate) -> anyhow::Result<Option<Candle>>;
    async fn find_range(&self, market: &str, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<Candle>>;
    async fn insert_many(&self, candles: &[Candle]) -> anyhow::Result<usize>;
}

#[async_trait]
pub trait PredictionRepository: Send + Sync {
    async fn find_by_fold_model(&self, market: &str, fold: u32, model: &str) -> anyhow::Result<Vec<Prediction>>;

    /// Idempotent: deletes existing rows for `(market, fold, model)` before
    /// inserting, so repeated loads of the same file are safe.
    async fn replace_for_fold_model(&self, market: &str, fold: u32, model: &str, predictions: &[Prediction]) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub error_message: Option<String>,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
}

#[async_trait]
pub trait BacktestJobRepository: Send + Sync {
    async fn create(&self, total_tasks: u32) -> anyhow::Result<Uuid>;
    async fn get(&self, job_id: Uuid) -> anyhow::Result<Option<BacktestJob>>;
    async fn mark_task_completed(&self, job_id: Uuid) -> anyhow::Result<()>;
    async fn mark_task_failed(&self, job_id: Uuid) -> anyhow::Result<()>;
    async fn mark_failed(&self, job_id: Uuid, message: &str) -> anyhow::Result<()>;
    /// Persist one task's backtest result as JSON, keyed by `(job_id, fold, model)`.
    async fn store_result(&self, job_id: Uuid, fold: u32, model: &str, result_json: &str) -> anyhow::Result<()>;
    async fn get_results(&self, job_id: Uuid) -> anyhow::Result<Vec<(u32, String, String)>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Filled,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct TradeOrder {
    pub id: Uuid,
    pub external_order_uuid: Option<String>,
    pub market: String,
    pub side: OrderSide,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub status: OrderStatus,
    pub account_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[async_trait]
pub trait TradeOrderRepository: Send + Sync {
    async fn insert(&self, order: &TradeOrder) -> anyhow::Result<()>;
    async fn find_by_uuid(&self, external_order_uuid: &str) -> anyhow::Result<Option<TradeOrder>>;
    async fn update_status(&self, id: Uuid, status: OrderStatus) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<Vec<TradeOrder>>;
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub currency: String,
    pub cash_balance: Decimal,
    pub created_at: NaiveDateTime,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Creates the singleton default account row if absent (id = 1).
    async fn ensure_default(&self) -> anyhow::Result<Account>;
    async fn get(&self, id: i64) -> anyhow::Result<Option<Account>>;
}
