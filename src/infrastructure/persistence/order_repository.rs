//! `sqlx`-backed `TradeOrderRepository` over `trade_order`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::repositories::{OrderSide, OrderStatus, TradeOrder, TradeOrderRepository};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn side_to_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

fn side_from_str(s: &str) -> OrderSide {
    match s {
        "SELL" => OrderSide::Sell,
        _ => OrderSide::Buy,
    }
}

fn status_to_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "PENDING",
        OrderStatus::Filled => "FILLED",
        OrderStatus::Canceled => "CANCELED",
    }
}

fn status_from_str(s: &str) -> OrderStatus {
    match s {
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        _ => OrderStatus::Pending,
    }
}

fn row_to_order(row: &SqliteRow) -> anyhow::Result<TradeOrder> {
    let id: String = row.try_get("id")?;
    let price: Option<String> = row.try_get("price")?;
    let amount: String = row.try_get("amount")?;
    let status: String = row.try_get("status")?;
    let side: String = row.try_get("side")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(TradeOrder {
        id: Uuid::parse_str(&id)?,
        external_order_uuid: row.try_get("external_order_uuid")?,
        market: row.try_get("market")?,
        side: side_from_str(&side),
        price: price.map(|p| Decimal::from_str(&p)).transpose()?,
        amount: Decimal::from_str(&amount)?,
        status: status_from_str(&status),
        account_id: row.try_get("account_id")?,
        created_at: NaiveDateTime::parse_from_str(&created_at, TS_FORMAT)?,
        updated_at: NaiveDateTime::parse_from_str(&updated_at, TS_FORMAT)?,
    })
}

pub struct SqliteTradeOrderRepository {
    pool: SqlitePool,
}

impl SqliteTradeOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeOrderRepository for SqliteTradeOrderRepository {
    async fn insert(&self, order: &TradeOrder) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO trade_order (id, external_order_uuid, market, side, price, amount, status, account_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(order.id.to_string())
        .bind(&order.external_order_uuid)
        .bind(&order.market)
        .bind(side_to_str(order.side))
        .bind(order.price.map(|p| p.to_string()))
        .bind(order.amount.to_string())
        .bind(status_to_str(order.status))
        .bind(order.account_id)
        .bind(order.created_at.format(TS_FORMAT).to_string())
        .bind(order.updated_at.format(TS_FORMAT).to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_uuid(&self, external_order_uuid: &str) -> anyhow::Result<Option<TradeOrder>> {
        let row = sqlx::query(
            "SELECT id, external_order_uuid, market, side, price, amount, status, account_id, created_at, updated_at
             FROM trade_order WHERE external_order_uuid = ?1",
        )
        .bind(external_order_uuid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> anyhow::Result<()> {
        sqlx::query("UPDATE trade_order SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id.to_string())
            .bind(status_to_str(status))
            .bind(chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<TradeOrder>> {
        let rows = sqlx::query(
            "SELECT id, external_order_uuid, market, side, price, amount, status, account_id, created_at, updated_at
             FROM trade_order ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }
}
