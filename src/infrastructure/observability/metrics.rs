//! Prometheus metrics for the backtesting/ingestion engine.
//!
//! All metrics use the `engine_` prefix and are read-only from outside this
//! module. Push-based: nothing in this crate runs an HTTP `/metrics`
//! endpoint — `render()` is wired into the periodic structured-log reporter
//! (see `reporter`) or an external pushgateway sidecar.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Backtests completed, by orchestrator kind.
    pub backtests_total: CounterVec,
    /// Trades produced, by exit reason.
    pub trades_total: CounterVec,
    /// Signals skipped by the simulator, by skip reason.
    pub skips_total: CounterVec,
    /// In-flight backtest jobs by status.
    pub jobs_by_status: GenericGaugeVec<AtomicF64>,
    /// Candle rows inserted by the ingestion pipeline.
    pub candles_ingested_total: CounterVec,
    /// Exchange API call latency.
    pub exchange_latency_seconds: HistogramVec,
    /// Circuit breaker state per named breaker (0=closed, 1=half-open, 2=open).
    pub circuit_breaker_state: GenericGaugeVec<AtomicF64>,
    /// Process uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let backtests_total = CounterVec::new(
            Opts::new("engine_backtests_total", "Backtests completed by orchestrator kind"),
            &["orchestrator"],
        )?;
        registry.register(Box::new(backtests_total.clone()))?;

        let trades_total = CounterVec::new(
            Opts::new("engine_trades_total", "Trades produced by exit reason"),
            &["exit_reason"],
        )?;
        registry.register(Box::new(trades_total.clone()))?;

        let skips_total = CounterVec::new(
            Opts::new("engine_skips_total", "Signals skipped by the simulator, by reason"),
            &["skip_reason"],
        )?;
        registry.register(Box::new(skips_total.clone()))?;

        let jobs_by_status = GaugeVec::new(
            Opts::new("engine_jobs_by_status", "In-flight backtest jobs by status"),
            &["status"],
        )?;
        registry.register(Box::new(jobs_by_status.clone()))?;

        let candles_ingested_total = CounterVec::new(
            Opts::new("engine_candles_ingested_total", "Candle rows inserted by the ingestion pipeline"),
            &["market"],
        )?;
        registry.register(Box::new(candles_ingested_total.clone()))?;

        let exchange_latency_seconds = HistogramVec::new(
            HistogramOpts::new("engine_exchange_latency_seconds", "Exchange API request latency in seconds")
                .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["endpoint"],
        )?;
        registry.register(Box::new(exchange_latency_seconds.clone()))?;

        let circuit_breaker_state = GaugeVec::new(
            Opts::new("engine_circuit_breaker_state", "Circuit breaker state (0=closed,1=half-open,2=open)"),
            &["breaker"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new("engine_uptime_seconds", "Process uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            backtests_total,
            trades_total,
            skips_total,
            jobs_by_status,
            candles_ingested_total,
            exchange_latency_seconds,
            circuit_breaker_state,
            uptime_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn inc_backtest(&self, orchestrator: &str) {
        self.backtests_total.with_label_values(&[orchestrator]).inc();
    }

    pub fn inc_trade(&self, exit_reason: &str) {
        self.trades_total.with_label_values(&[exit_reason]).inc();
    }

    pub fn inc_skip(&self, skip_reason: &str) {
        self.skips_total.with_label_values(&[skip_reason]).inc();
    }

    pub fn set_jobs_by_status(&self, status: &str, count: f64) {
        self.jobs_by_status.with_label_values(&[status]).set(count);
    }

    pub fn inc_candles_ingested(&self, market: &str, count: usize) {
        self.candles_ingested_total.with_label_values(&[market]).inc_by(count as f64);
    }

    pub fn observe_exchange_latency(&self, endpoint: &str, latency_secs: f64) {
        self.exchange_latency_seconds.with_label_values(&[endpoint]).observe(latency_secs);
    }

    pub fn set_circuit_breaker_state(&self, breaker: &str, state: f64) {
        self.circuit_breaker_state.with_label_values(&[breaker]).set(state);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation_registers_engine_prefixed_series() {
        let metrics = Metrics::new().expect("failed to create metrics");
        assert!(metrics.render().contains("engine_"));
    }

    #[test]
    fn trade_counter_increments_by_reason() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.inc_trade("TAKE_PROFIT");
        metrics.inc_trade("STOP_LOSS");
        let output = metrics.render();
        assert!(output.contains("engine_trades_total"));
        assert!(output.contains("TAKE_PROFIT"));
    }

    #[test]
    fn jobs_by_status_gauge_reports_latest_value() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.set_jobs_by_status("RUNNING", 3.0);
        let output = metrics.render();
        assert!(output.contains("engine_jobs_by_status"));
        assert!(output.contains("RUNNING"));
    }
}
