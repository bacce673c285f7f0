//! Process-wide configuration, composed from narrow sub-configs the way the
//! teacher's `BrokerEnvConfig`/`StrategyEnvConfig`/`RiskEnvConfig` split was
//! structured. Loaded once at startup via `Config::from_env()`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

#[derive(Debug, Clone)]
pub struct ExchangeEnvConfig {
    pub access_key: String,
    pub secret_key: String,
    pub base_url: String,
}

impl ExchangeEnvConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            access_key: env::var("EXCHANGE_ACCESS_KEY").unwrap_or_default(),
            secret_key: env::var("EXCHANGE_SECRET_KEY").unwrap_or_default(),
            base_url: env::var("EXCHANGE_BASE_URL").unwrap_or_else(|_| "https://api.upbit.com".to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BacktestEnvConfig {
    pub allowed_market: String,
    pub min_order_amount: Decimal,
    pub max_order_amount: Decimal,
    pub max_daily_trades: u32,
}

impl BacktestEnvConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            allowed_market: env::var("ALLOWED_MARKET").unwrap_or_else(|_| "KRW-ETH".to_string()),
            min_order_amount: parse_decimal_env("MIN_ORDER_AMOUNT", dec!(5000))?,
            max_order_amount: parse_decimal_env("MAX_ORDER_AMOUNT", dec!(1000000))?,
            max_daily_trades: parse_u32_env("MAX_DAILY_TRADES", 20)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngestionEnvConfig {
    pub batch_size: u32,
    pub sleep_between_requests_ms: u64,
    pub stall_threshold: u32,
}

impl IngestionEnvConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            batch_size: parse_u32_env("INGESTION_BATCH_SIZE", 200)?,
            sleep_between_requests_ms: parse_u64_env("INGESTION_SLEEP_MS", 100)?,
            stall_threshold: parse_u32_env("INGESTION_STALL_THRESHOLD", 3)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub exchange: ExchangeEnvConfig,
    pub backtest: BacktestEnvConfig,
    pub ingestion: IngestionEnvConfig,
    pub database_url: String,
    pub observability_enabled: bool,
    pub job_runner_concurrency: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            exchange: ExchangeEnvConfig::from_env()?,
            backtest: BacktestEnvConfig::from_env()?,
            ingestion: IngestionEnvConfig::from_env()?,
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/engine.db".to_string()),
            observability_enabled: env::var("OBSERVABILITY_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            job_runner_concurrency: parse_u32_env("JOB_RUNNER_CONCURRENCY", 4)? as usize,
        })
    }
}

fn parse_decimal_env(key: &str, default: Decimal) -> anyhow::Result<Decimal> {
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_u32_env(key: &str, default: u32) -> anyhow::Result<u32> {
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_u64_env(key: &str, default: u64) -> anyhow::Result<u64> {
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_vars_absent() {
        // SAFETY: test-only mutation of process env, single-threaded test execution assumed.
        unsafe {
            env::remove_var("ALLOWED_MARKET");
            env::remove_var("MIN_ORDER_AMOUNT");
        }
        let cfg = BacktestEnvConfig::from_env().unwrap();
        assert_eq!(cfg.allowed_market, "KRW-ETH");
        assert_eq!(cfg.min_order_amount, dec!(5000));
    }

    #[test]
    fn ingestion_defaults_match_spec_constants() {
        unsafe {
            env::remove_var("INGESTION_BATCH_SIZE");
            env::remove_var("INGESTION_SLEEP_MS");
            env::remove_var("INGESTION_STALL_THRESHOLD");
        }
        let cfg = IngestionEnvConfig::from_env().unwrap();
        assert_eq!(cfg.batch_size, 200);
        assert_eq!(cfg.sleep_between_requests_ms, 100);
        assert_eq!(cfg.stall_threshold, 3);
    }
}
