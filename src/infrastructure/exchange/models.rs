//! Wire-format structs for the exchange's JSON responses. Field names match
//! the exchange's own snake_case naming; conversion into domain types
//! (`Candle`, `TradeOrder`) happens in `upbit_client`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct CandleResponse {
    pub market: String,
    /// Local market wall-clock time, e.g. `2024-01-15T09:00:00`.
    pub candle_date_time_kst: String,
    /// Same instant in UTC, no timezone suffix.
    pub candle_date_time_utc: String,
    pub opening_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub trade_price: Decimal,
    pub candle_acc_trade_volume: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountBalance {
    pub currency: String,
    pub balance: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerResponse {
    pub market: String,
    pub trade_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderRequest {
    pub market: String,
    pub side: String,
    pub volume: Option<String>,
    pub price: Option<String>,
    pub ord_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub uuid: String,
    pub market: String,
    pub side: String,
    pub state: String,
    pub price: Option<Decimal>,
    pub volume: Option<Decimal>,
}
