//! Request metrics.
//!
//! Servers and handlers take a [`MetricsSink`] at construction; the default
//! [`NoopMetrics`] records nothing.

use prometheus::{HistogramOpts, HistogramVec, IntCounter, Registry};
use std::sync::Arc;
use std::time::Duration;

pub trait MetricsSink: Send + Sync {
    /// Record one served call (unsubscribe calls are not reported).
    fn record_request(&self, method: &str, success: bool, elapsed: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_request(&self, _method: &str, _success: bool, _elapsed: Duration) {}
}

pub fn noop() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

/// Prometheus-backed request metrics.
#[derive(Clone)]
pub struct PrometheusMetrics {
    requests: IntCounter,
    successes: IntCounter,
    failures: IntCounter,
    duration: HistogramVec,
}

impl PrometheusMetrics {
    /// Create the collectors and register them with `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounter::new("rpc_requests_total", "Total number of RPC requests")?;
        let successes = IntCounter::new("rpc_success_total", "Total number of successful RPC requests")?;
        let failures = IntCounter::new("rpc_failure_total", "Total number of failed RPC requests")?;
        let duration = HistogramVec::new(
            HistogramOpts::new("rpc_duration_seconds", "RPC request duration in seconds").buckets(
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            ),
            &["method", "outcome"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(successes.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            requests,
            successes,
            failures,
            duration,
        })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_request(&self, method: &str, success: bool, elapsed: Duration) {
        self.requests.inc();
        let outcome = if success {
            self.successes.inc();
            "success"
        } else {
            self.failures.inc();
            "failure"
        };
        self.duration
            .with_label_values(&[method, outcome])
            .observe(elapsed.as_secs_f64());
    }
}
