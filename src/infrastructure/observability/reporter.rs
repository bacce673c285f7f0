//! Periodic push of the metrics snapshot to structured logs. No HTTP
//! server — just a background task that logs `render()`'s output on an
//! interval, in the same spirit as the teacher's `bin/server.rs` metrics
//! reporter loop.

use std::time::Duration;
use tracing::info;

use super::metrics::Metrics;

pub struct MetricsReporter {
    metrics: Metrics,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Runs forever; intended to be spawned as a background task.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            info!(target: "metrics", "{}", self.metrics.render());
        }
    }
}
