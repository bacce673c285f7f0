//! Live-trading collaborator: validates an order against the configured
//! safety ladder, places it on the exchange, and persists the result. No
//! decisioning lives here — callers supply the side, price and amount; this
//! module only guards the boundary and keeps the local order table in sync.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::BacktestEnvConfig;
use crate::domain::errors::{InsufficientBalanceError, ValidationError};
use crate::domain::repositories::{AccountRepository, OrderSide, OrderStatus, TradeOrder, TradeOrderRepository};
use crate::infrastructure::exchange::UpbitClient;

/// Validates a candidate order against the configured market, amount bounds
/// and daily trade cap. Returns the first violated rule.
fn validate_order(config: &BacktestEnvConfig, market: &str, amount: Decimal, trades_today: u32) -> Result<(), ValidationError> {
    if market != config.allowed_market {
        return Err(ValidationError::DisallowedMarket {
            market: market.to_string(),
            allowed: config.allowed_market.clone(),
        });
    }
    if amount < config.min_order_amount {
        return Err(ValidationError::BelowMinOrderAmount {
            amount,
            min: config.min_order_amount,
        });
    }
    if amount > config.max_order_amount {
        return Err(ValidationError::AboveMaxOrderAmount {
            amount,
            max: config.max_order_amount,
        });
    }
    if trades_today >= config.max_daily_trades {
        return Err(ValidationError::DailyTradeLimitExceeded {
            count: trades_today,
            max: config.max_daily_trades,
        });
    }
    Ok(())
}

/// Places a market buy of `amount` quote currency, after checking the
/// account holds at least that much cash. The request is serialised at this
/// single call: one validation pass, at most one exchange order, at most one
/// local insert.
pub async fn buy(
    client: &UpbitClient,
    orders: &dyn TradeOrderRepository,
    accounts: &dyn AccountRepository,
    config: &BacktestEnvConfig,
    market: &str,
    amount: Decimal,
) -> anyhow::Result<TradeOrder> {
    let trades_today = count_trades_today(orders).await?;
    validate_order(config, market, amount, trades_today)?;

    let account = accounts.ensure_default().await?;
    if account.cash_balance < amount {
        return Err(InsufficientBalanceError::Insufficient {
            need: amount,
            available: account.cash_balance,
        }
        .into());
    }

    // Market buy: Upbit takes the quote-currency amount as `price` with no `volume`.
    let mut order = client.place_order(market, OrderSide::Buy, Some(amount), Decimal::ZERO).await?;
    order.account_id = Some(account.id);
    orders.insert(&order).await?;
    Ok(order)
}

/// Places a market sell of `volume` base currency.
pub async fn sell(
    client: &UpbitClient,
    orders: &dyn TradeOrderRepository,
    accounts: &dyn AccountRepository,
    config: &BacktestEnvConfig,
    market: &str,
    volume: Decimal,
) -> anyhow::Result<TradeOrder> {
    let trades_today = count_trades_today(orders).await?;
    validate_order(config, market, volume, trades_today)?;

    let account = accounts.ensure_default().await?;

    // Market sell: Upbit takes the base-currency volume as `volume` with no `price`.
    let mut order = client.place_order(market, OrderSide::Sell, None, volume).await?;
    order.account_id = Some(account.id);
    orders.insert(&order).await?;
    Ok(order)
}

async fn count_trades_today(orders: &dyn TradeOrderRepository) -> anyhow::Result<u32> {
    let today = Utc::now().date_naive();
    let all = orders.list().await?;
    Ok(all.iter().filter(|o| o.created_at.date() == today).count() as u32)
}

/// Syncs every locally-pending order against the exchange's current state.
/// Orders with no `external_order_uuid` (never confirmed as placed) are left
/// untouched — there is nothing to look up.
pub async fn sync_all(client: &UpbitClient, orders: &dyn TradeOrderRepository) -> anyhow::Result<usize> {
    let local = orders.list().await?;
    let mut synced = 0usize;
    for order in local.into_iter().filter(|o| o.status == OrderStatus::Pending) {
        let Some(external_uuid) = order.external_order_uuid.as_deref() else {
            continue;
        };
        let remote = client.fetch_order(external_uuid).await?;
        if remote.status != order.status {
            orders.update_status(order.id, remote.status).await?;
            synced += 1;
        }
    }
    Ok(synced)
}

/// Looks up a locally-stored order by its exchange UUID.
pub async fn find_order(orders: &dyn TradeOrderRepository, external_uuid: &str) -> anyhow::Result<Option<TradeOrder>> {
    orders.find_by_uuid(external_uuid).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> BacktestEnvConfig {
        BacktestEnvConfig {
            allowed_market: "KRW-ETH".to_string(),
            min_order_amount: dec!(5000),
            max_order_amount: dec!(1000000),
            max_daily_trades: 2,
        }
    }

    #[test]
    fn rejects_disallowed_market() {
        let err = validate_order(&config(), "KRW-BTC", dec!(10000), 0).unwrap_err();
        assert!(matches!(err, ValidationError::DisallowedMarket { .. }));
    }

    #[test]
    fn rejects_below_minimum() {
        let err = validate_order(&config(), "KRW-ETH", dec!(1000), 0).unwrap_err();
        assert!(matches!(err, ValidationError::BelowMinOrderAmount { .. }));
    }

    #[test]
    fn rejects_above_maximum() {
        let err = validate_order(&config(), "KRW-ETH", dec!(2000000), 0).unwrap_err();
        assert!(matches!(err, ValidationError::AboveMaxOrderAmount { .. }));
    }

    #[test]
    fn rejects_when_daily_limit_reached() {
        let err = validate_order(&config(), "KRW-ETH", dec!(10000), 2).unwrap_err();
        assert!(matches!(err, ValidationError::DailyTradeLimitExceeded { .. }));
    }

    #[test]
    fn approves_within_bounds() {
        assert!(validate_order(&config(), "KRW-ETH", dec!(10000), 1).is_ok());
    }
}
