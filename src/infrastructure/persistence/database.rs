use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper. Schema bootstrap is hand-written
/// `CREATE TABLE IF NOT EXISTS` plus best-effort `ALTER TABLE` migrations —
/// no reflection-based ORM, matching the teacher's
/// `infrastructure::persistence::database::Database`.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // An in-memory database is private to the connection that opened it;
        // a pool of more than one connection would silently fan queries out
        // across unrelated empty databases. Pin the pool to a single
        // connection so the whole process shares the one in-memory instance.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!("connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;
        db.ensure_default_account().await?;

        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS historical_ohlcv (
                market TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (market, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create historical_ohlcv table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS historical_minute_ohlcv (
                market TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (market, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create historical_minute_ohlcv table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_minute_ohlcv_market_time
            ON historical_minute_ohlcv (market, timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create historical_minute_ohlcv index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS historical_ai_predictions (
                market TEXT NOT NULL,
                date TEXT NOT NULL,
                fold INTEGER NOT NULL,
                model TEXT NOT NULL,
                actual_direction TEXT,
                actual_return TEXT,
                pred_direction TEXT NOT NULL,
                pred_proba_up TEXT NOT NULL,
                pred_proba_down TEXT NOT NULL,
                max_proba TEXT NOT NULL,
                confidence TEXT NOT NULL,
                take_profit_price TEXT NOT NULL,
                stop_loss_price TEXT NOT NULL,
                correct INTEGER,
                PRIMARY KEY (market, date, fold, model)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create historical_ai_predictions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account (
                id INTEGER PRIMARY KEY,
                currency TEXT NOT NULL,
                cash_balance TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create account table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_order (
                id TEXT PRIMARY KEY,
                external_order_uuid TEXT,
                market TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT,
                amount TEXT NOT NULL,
                status TEXT NOT NULL,
                account_id INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trade_order table")?;

        // Migration: older rows may predate the account_id column.
        let _ = sqlx::query("ALTER TABLE trade_order ADD COLUMN account_id INTEGER")
            .execute(&mut *conn)
            .await;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trading_settings (
                id INTEGER PRIMARY KEY,
                market_symbol TEXT NOT NULL,
                min_order_amount TEXT NOT NULL,
                max_order_amount TEXT NOT NULL,
                max_daily_trades INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trading_settings table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backtest_jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                total_tasks INTEGER NOT NULL,
                completed_tasks INTEGER NOT NULL,
                failed_tasks INTEGER NOT NULL,
                error_message TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create backtest_jobs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backtest_job_results (
                job_id TEXT NOT NULL,
                fold INTEGER NOT NULL,
                model TEXT NOT NULL,
                result_json TEXT NOT NULL,
                PRIMARY KEY (job_id, fold, model)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create backtest_job_results table")?;

        info!("database schema initialized");
        Ok(())
    }

    /// `INSERT OR IGNORE` on a singleton id-1 account row, resolving the
    /// spec's open question by always having a default account to attach
    /// `trade_order.account_id` to.
    async fn ensure_default_account(&self) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO account (id, currency, cash_balance, created_at)
            VALUES (1, 'KRW', '0', datetime('now'));
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure default account")?;
        Ok(())
    }
}
