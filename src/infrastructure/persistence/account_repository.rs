//! `sqlx`-backed `AccountRepository` over the singleton `account` row.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::repositories::{Account, AccountRepository};

const DEFAULT_ACCOUNT_ID: i64 = 1;
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

impl SqliteAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn ensure_default(&self) -> anyhow::Result<Account> {
        sqlx::query(
            "INSERT OR IGNORE INTO account (id, currency, cash_balance, created_at) VALUES (?1, 'KRW', '0', ?2)",
        )
        .bind(DEFAULT_ACCOUNT_ID)
        .bind(chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string())
        .execute(&self.pool)
        .await?;

        self.get(DEFAULT_ACCOUNT_ID)
            .await?
            .ok_or_else(|| anyhow::anyhow!("default account row missing after ensure_default"))
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<Account>> {
        let row = sqlx::query("SELECT id, currency, cash_balance, created_at FROM account WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let cash_balance: String = row.try_get("cash_balance")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Some(Account {
            id: row.try_get("id")?,
            currency: row.try_get("currency")?,
            cash_balance: Decimal::from_str(&cash_balance)?,
            created_at: NaiveDateTime::parse_from_str(&created_at, TS_FORMAT)?,
        }))
    }
}
