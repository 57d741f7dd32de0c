//! Per-source request metrics
//!
//! Tracks latency percentiles and success rates for each price source the
//! registry queries.

use crate::error::SourceError;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of samples to keep for metrics calculation
const MAX_SAMPLES: usize = 100;

/// Snapshot of one source's request metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMetrics {
    pub source_name: String,
    /// 50th percentile latency of successful requests, in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency of successful requests, in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0) over the lifetime of the collector
    pub success_rate: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Failures that were rate limiting
    pub throttled_requests: u64,
    pub last_error: Option<String>,
}

impl SourceMetrics {
    /// Creates metrics with no data
    pub fn empty(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
            throttled_requests: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    /// Rolling window of (latency ms, success)
    samples: VecDeque<(f64, bool)>,
    total: u64,
    failed: u64,
    throttled: u64,
    last_error: Option<String>,
}

/// Collects request outcomes for one source
pub struct MetricsCollector {
    source_name: String,
    state: RwLock<MetricsState>,
}

impl MetricsCollector {
    pub fn new(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            state: RwLock::new(MetricsState {
                samples: VecDeque::with_capacity(MAX_SAMPLES),
                ..MetricsState::default()
            }),
        }
    }

    /// Records one request and how it ended
    pub async fn record<T>(&self, duration: Duration, outcome: &Result<T, SourceError>) {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        let mut state = self.state.write().await;

        state.total += 1;
        if let Err(e) = outcome {
            state.failed += 1;
            if matches!(e, SourceError::Throttled { .. }) {
                state.throttled += 1;
            }
            state.last_error = Some(e.to_string());
        }

        if state.samples.len() >= MAX_SAMPLES {
            state.samples.pop_front();
        }
        state.samples.push_back((duration_ms, outcome.is_ok()));
    }

    /// Computes current metrics from collected samples
    pub async fn snapshot(&self) -> SourceMetrics {
        let state = self.state.read().await;
        if state.samples.is_empty() {
            return SourceMetrics::empty(&self.source_name);
        }

        let mut latencies: Vec<f64> = state
            .samples
            .iter()
            .filter(|(_, success)| *success)
            .map(|(ms, _)| *ms)
            .collect();
        latencies.sort_by(f64::total_cmp);

        SourceMetrics {
            source_name: self.source_name.clone(),
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate: (state.total - state.failed) as f64 / state.total as f64,
            total_requests: state.total,
            failed_requests: state.failed,
            throttled_requests: state.throttled,
            last_error: state.last_error.clone(),
        }
    }
}

/// Nearest-rank percentile of already sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_collector() {
        let collector = MetricsCollector::new("test");

        collector.record(Duration::from_millis(100), &Ok::<_, SourceError>(1.0)).await;
        collector.record(Duration::from_millis(200), &Ok::<_, SourceError>(1.0)).await;
        collector
            .record(Duration::from_millis(150), &Err::<f64, _>(SourceError::throttled("test")))
            .await;

        let metrics = collector.snapshot().await;

        assert_eq!(metrics.source_name, "test");
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.throttled_requests, 1);
        assert_eq!(metrics.last_error.as_deref(), Some("test: throttled"));
        assert!(metrics.success_rate > 0.6 && metrics.success_rate < 0.7);
        assert_eq!(metrics.latency_p99_ms, 200.0);
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let collector = MetricsCollector::new("test");
        for ms in 0..(MAX_SAMPLES as u64 + 20) {
            collector.record(Duration::from_millis(ms), &Ok::<_, SourceError>(())).await;
        }
        let metrics = collector.snapshot().await;
        assert_eq!(metrics.total_requests, MAX_SAMPLES as u64 + 20);
        // the first 20 samples have rolled out
        assert_eq!(metrics.latency_p50_ms.round(), 70.0);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&values, 50.0), 6.0);
        assert_eq!(percentile(&values, 99.0), 10.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }
}
