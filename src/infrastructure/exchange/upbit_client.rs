//! Upbit REST client. Wraps the shared `HttpClientFactory` client with a
//! named `CircuitBreaker` so a run of failures trips the breaker instead of
//! hammering a degraded exchange; every call is signed per `auth::sign`.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::auth;
use super::models::{AccountBalance, CandleResponse, OrderResponse, PlaceOrderRequest, TickerResponse};
use crate::domain::candle::Candle;
use crate::domain::errors::ExchangeApiError;
use crate::domain::repositories::{OrderSide, OrderStatus, TradeOrder};
use crate::infrastructure::core::{CircuitBreaker, CircuitBreakerError, HttpClientFactory, circuit_breaker::CircuitState};
use crate::infrastructure::observability::Metrics;

const KST_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct UpbitClient {
    client: ClientWithMiddleware,
    breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
    base_url: String,
    access_key: String,
    secret_key: String,
}

fn circuit_state_gauge(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}

impl UpbitClient {
    pub fn new(base_url: String, access_key: String, secret_key: String, metrics: Metrics) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            breaker: Arc::new(CircuitBreaker::new("upbit", 5, 2, Duration::from_secs(30))),
            metrics,
            base_url,
            access_key,
            secret_key,
        }
    }

    /// Runs `f` through the named circuit breaker, recording its outcome
    /// latency and the breaker's post-call state to `self.metrics`.
    async fn guarded<F, T>(&self, endpoint: &str, f: F) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = Result<T, ExchangeApiError>>,
    {
        let started = Instant::now();
        let result = self.breaker.call(f).await;
        self.metrics.observe_exchange_latency(endpoint, started.elapsed().as_secs_f64());
        self.metrics.set_circuit_breaker_state("upbit", circuit_state_gauge(self.breaker.state().await));

        match result {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open(message)) => Err(ExchangeApiError::Transport(message).into()),
            Err(CircuitBreakerError::Inner(err)) => Err(err.into()),
        }
    }

    fn auth_header(&self, query_string: &str) -> anyhow::Result<String> {
        auth::sign(&self.access_key, &self.secret_key, query_string)
    }

    pub async fn fetch_accounts(&self) -> anyhow::Result<Vec<AccountBalance>> {
        self.request_signed_get::<Vec<AccountBalance>>("/v1/accounts", &[]).await
    }

    pub async fn fetch_ticker(&self, market: &str) -> anyhow::Result<Decimal> {
        let tickers: Vec<TickerResponse> = self
            .request_signed_get("/v1/ticker", &[("markets", market.to_string())])
            .await?;
        tickers
            .into_iter()
            .next()
            .map(|t| t.trade_price)
            .ok_or_else(|| ExchangeApiError::NonSuccess { status: 200, message: "empty ticker response".to_string() }.into())
    }

    pub async fn fetch_day_candles(&self, market: &str, count: u32, to: Option<DateTime<Utc>>) -> anyhow::Result<Vec<Candle>> {
        let mut query = vec![("market", market.to_string()), ("count", count.min(200).to_string())];
        if let Some(to) = to {
            query.push(("to", to.format("%Y-%m-%d %H:%M:%S").to_string()));
        }
        let responses: Vec<CandleResponse> = self.request_signed_get("/v1/candles/days", &query).await?;
        responses.into_iter().map(|r| to_domain_candle(market, r)).collect()
    }

    pub async fn fetch_minute_candles(&self, market: &str, count: u32, to: Option<DateTime<Utc>>) -> anyhow::Result<Vec<Candle>> {
        let mut query = vec![("market", market.to_string()), ("count", count.min(200).to_string())];
        if let Some(to) = to {
            query.push(("to", to.format("%Y-%m-%d %H:%M:%S").to_string()));
        }
        let responses: Vec<CandleResponse> = self.request_signed_get("/v1/candles/minutes/1", &query).await?;
        responses.into_iter().map(|r| to_domain_candle(market, r)).collect()
    }

    pub async fn place_order(&self, market: &str, side: OrderSide, price: Option<Decimal>, volume: Decimal) -> anyhow::Result<TradeOrder> {
        // `bid` + `price` is a market buy (quote-denominated: only `price` is
        // sent); `ask` + `market` is a market sell (base-denominated: only
        // `volume` is sent). Upbit rejects a request carrying both fields.
        let request = PlaceOrderRequest {
            market: market.to_string(),
            side: match side {
                OrderSide::Buy => "bid".to_string(),
                OrderSide::Sell => "ask".to_string(),
            },
            volume: price.is_none().then(|| volume.to_string()),
            price: price.map(|p| p.to_string()),
            ord_type: if price.is_some() { "price".to_string() } else { "market".to_string() },
        };

        let body = serde_json::to_string(&request)?;
        let header = self.auth_header(&body)?;
        let url = format!("{}/v1/orders", self.base_url);

        let response: OrderResponse = self
            .guarded("/v1/orders", async {
                self.client
                    .post(&url)
                    .header("Authorization", header)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| ExchangeApiError::Transport(e.to_string()))?
                    .json()
                    .await
                    .map_err(|e| ExchangeApiError::Transport(e.to_string()))
            })
            .await?;

        Ok(order_response_to_domain(response))
    }

    pub async fn fetch_order(&self, uuid: &str) -> anyhow::Result<TradeOrder> {
        let response: OrderResponse = self.request_signed_get("/v1/order", &[("uuid", uuid.to_string())]).await?;
        Ok(order_response_to_domain(response))
    }

    pub async fn fetch_orders(&self, state: &str) -> anyhow::Result<Vec<TradeOrder>> {
        let responses: Vec<OrderResponse> = self.request_signed_get("/v1/orders", &[("state", state.to_string())]).await?;
        Ok(responses.into_iter().map(order_response_to_domain).collect())
    }

    async fn request_signed_get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<T> {
        let query_string: String = query.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        let header = self.auth_header(&query_string)?;
        let url = format!("{}{}", self.base_url, path);
        let query = query.to_vec();

        self.guarded(path, async {
            let mut request = self.client.get(&url).header("Authorization", header);
            if !query.is_empty() {
                request = request.query(&query);
            }

            let response = request.send().await.map_err(|e| ExchangeApiError::Transport(e.to_string()))?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ExchangeApiError::AuthFailure("invalid access/secret key".to_string()));
            }
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let message = response.text().await.unwrap_or_default();
                warn!(status, %message, path, "exchange request failed");
                return Err(ExchangeApiError::NonSuccess { status, message });
            }

            response.json::<T>().await.map_err(|e| ExchangeApiError::Transport(e.to_string()))
        })
        .await
    }
}

fn to_domain_candle(market: &str, response: CandleResponse) -> anyhow::Result<Candle> {
    let timestamp = NaiveDateTime::parse_from_str(&response.candle_date_time_kst, KST_FORMAT)?;
    Ok(Candle {
        market: market.to_string(),
        timestamp,
        open: response.opening_price,
        high: response.high_price,
        low: response.low_price,
        close: response.trade_price,
        volume: response.candle_acc_trade_volume,
    })
}

fn order_response_to_domain(response: OrderResponse) -> TradeOrder {
    let now = chrono::Utc::now().naive_utc();
    TradeOrder {
        id: uuid::Uuid::new_v4(),
        external_order_uuid: Some(response.uuid),
        market: response.market,
        side: if response.side == "bid" { OrderSide::Buy } else { OrderSide::Sell },
        price: response.price,
        amount: response.volume.unwrap_or(Decimal::ZERO),
        status: match response.state.as_str() {
            "done" => OrderStatus::Filled,
            "cancel" => OrderStatus::Canceled,
            _ => OrderStatus::Pending,
        },
        account_id: None,
        created_at: now,
        updated_at: now,
    }
}
