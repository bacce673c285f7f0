use rust_decimal::Decimal;
use thiserror::Error;

/// Bad input at a boundary: fold numbers, thresholds, capital, market symbols,
/// order amounts. Surfaced to callers as 400.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("fold {fold} is out of range [1, {max}]")]
    FoldOutOfRange { fold: u32, max: u32 },

    #[error("threshold {value} is out of range [{min}, {max}] for {column}")]
    ThresholdOutOfRange {
        column: String,
        value: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("initial capital must be non-negative, got {capital}")]
    NonPositiveCapital { capital: Decimal },

    #[error("market {market} is not the configured market {allowed}")]
    DisallowedMarket { market: String, allowed: String },

    #[error("order amount {amount} is below the minimum {min}")]
    BelowMinOrderAmount { amount: Decimal, min: Decimal },

    #[error("order amount {amount} exceeds the maximum {max}")]
    AboveMaxOrderAmount { amount: Decimal, max: Decimal },

    #[error("daily trade count {count} exceeds the configured maximum {max}")]
    DailyTradeLimitExceeded { count: u32, max: u32 },
}

/// Unknown job id or no order matching a UUID. Surfaced as 404.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("no job with id {0}")]
    JobNotFound(uuid::Uuid),

    #[error("no order matching uuid {0}")]
    OrderNotFound(uuid::Uuid),
}

/// Missing predictions/candles. The simulator skips the offending signal
/// rather than propagating this as a hard failure (see domain::trade::SkipReason).
#[derive(Debug, Error)]
pub enum DataMissingError {
    #[error("no predictions for fold {fold}, model {model}")]
    NoPredictions { fold: u32, model: String },

    #[error("no candle at or after {at} for market {market}")]
    NoCandleAtOrAfter {
        market: String,
        at: chrono::NaiveDateTime,
    },

    #[error("no candles in range {start}..{end} for market {market}")]
    NoCandlesInRange {
        market: String,
        start: chrono::NaiveDateTime,
        end: chrono::NaiveDateTime,
    },
}

/// Live-trading balance insufficient for the requested order. Surfaced as 400.
#[derive(Debug, Error)]
pub enum InsufficientBalanceError {
    #[error("insufficient balance: need {need}, available {available}")]
    Insufficient { need: Decimal, available: Decimal },
}

/// Non-2xx, timeout, or auth failure talking to the exchange. Bubbled as 500
/// with the upstream message.
#[derive(Debug, Error)]
pub enum ExchangeApiError {
    #[error("exchange returned {status}: {message}")]
    NonSuccess { status: u16, message: String },

    #[error("exchange request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("exchange auth failure: {0}")]
    AuthFailure(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// File-level CSV load failure. Per-row parse failures are logged and
/// skipped by the loaders themselves and never reach this type.
#[derive(Debug, Error)]
pub enum CsvParseError {
    #[error("failed to open csv file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv file {path} is missing required header column {column}")]
    MissingColumn { path: String, column: String },
}

/// Unrecoverable failure in the async job runner. The owning job transitions
/// to Failed with this message; future status polls observe it.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("job {job_id} failed: {message}")]
    Failed { job_id: uuid::Uuid, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn validation_error_formats_fields() {
        let err = ValidationError::ThresholdOutOfRange {
            column: "PRED_PROBA_UP".to_string(),
            value: dec!(1.5),
            min: dec!(0),
            max: dec!(1),
        };
        let msg = err.to_string();
        assert!(msg.contains("PRED_PROBA_UP"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn not_found_error_formats_uuid() {
        let id = uuid::Uuid::nil();
        let err = NotFoundError::JobNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn insufficient_balance_formats_amounts() {
        let err = InsufficientBalanceError::Insufficient {
            need: dec!(100),
            available: dec!(50),
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
    }
}
