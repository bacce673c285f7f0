//! Minute-candle backfill: walks backwards from a resume cursor, fetching
//! 200-candle batches from the exchange and persisting the new rows, until
//! it reaches the requested start date, runs dry, or stalls.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::config::IngestionEnvConfig;
use crate::domain::candle::Candle;
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::exchange::UpbitClient;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::candle_repository::naive_to_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    ReachedStart,
    ExchangeExhausted,
    Stalled,
}

/// Backward-walking minute-candle backfill for one market.
pub struct MinuteCandleBackfill<'a> {
    client: &'a UpbitClient,
    candles: &'a dyn CandleRepository,
    config: &'a IngestionEnvConfig,
    metrics: &'a Metrics,
}

impl<'a> MinuteCandleBackfill<'a> {
    pub fn new(client: &'a UpbitClient, candles: &'a dyn CandleRepository, config: &'a IngestionEnvConfig, metrics: &'a Metrics) -> Self {
        Self { client, candles, config, metrics }
    }

    /// Runs the backfill for `market` down to `start_date`, resuming from
    /// whatever is already stored (or from `end_date` 23:59:59 if nothing is).
    pub async fn run(&self, market: &str, start_date: NaiveDate, end_date: NaiveDate) -> anyhow::Result<BackfillOutcome> {
        let mut cursor = match self.candles.oldest_timestamp(market).await? {
            Some(oldest) => oldest,
            None => end_date.and_hms_opt(23, 59, 59).expect("23:59:59 is a valid time"),
        };

        let start_boundary = start_date.and_hms_opt(0, 0, 0).expect("midnight is a valid time");
        let mut consecutive_empty_batches = 0u32;

        loop {
            if cursor < start_boundary {
                return Ok(BackfillOutcome::ReachedStart);
            }

            let batch = self.client.fetch_minute_candles(market, self.config.batch_size, Some(naive_to_utc(cursor))).await?;
            if batch.is_empty() {
                info!(market, %cursor, "exchange returned no candles; backfill exhausted");
                return Ok(BackfillOutcome::ExchangeExhausted);
            }

            let candidates: Vec<NaiveDateTime> = batch.iter().map(|c| c.timestamp).collect();
            let existing = self.candles.existing_timestamps(market, &candidates).await?;
            let new_candles: Vec<Candle> = batch.iter().filter(|c| !existing.contains(&c.timestamp)).cloned().collect();

            let oldest_in_batch = batch.iter().map(|c| c.timestamp).min().expect("batch checked non-empty above");

            if new_candles.is_empty() {
                consecutive_empty_batches += 1;
                cursor = oldest_in_batch - Duration::minutes(1);
            } else {
                self.candles.insert_many(&new_candles).await?;
                self.metrics.inc_candles_ingested(market, new_candles.len());
                consecutive_empty_batches = 0;
                cursor = new_candles.iter().map(|c| c.timestamp).min().expect("new_candles checked non-empty above");
            }

            if consecutive_empty_batches >= self.config.stall_threshold {
                warn!(market, stall_threshold = self.config.stall_threshold, "backfill stalled on repeated duplicate batches");
                return Ok(BackfillOutcome::Stalled);
            }

            tokio::time::sleep(std::time::Duration::from_millis(self.config.sleep_between_requests_ms)).await;
        }
    }
}

/// Convenience wrapper: backfill far enough back to cover every CUSUM signal
/// currently cached, plus a one-day margin for expiration windows.
///
/// Only the historical direction is supported. If `latest_signal` extends
/// past today, the excess is clipped and a warning is logged rather than
/// attempting to fetch candles that don't exist yet.
pub async fn backfill_for_signals(
    client: &UpbitClient,
    candles: &dyn CandleRepository,
    config: &IngestionEnvConfig,
    metrics: &Metrics,
    market: &str,
    earliest_signal: NaiveDate,
    latest_signal: NaiveDate,
) -> anyhow::Result<BackfillOutcome> {
    let today = chrono::Utc::now().date_naive();
    let clamped_latest = if latest_signal > today {
        warn!(market, %latest_signal, %today, "signal range extends into the future; backfilling only the historical portion");
        today
    } else {
        latest_signal
    };

    let runner = MinuteCandleBackfill::new(client, candles, config, metrics);
    runner.run(market, earliest_signal, clamped_latest + Duration::days(1)).await
}
