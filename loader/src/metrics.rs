//! Latency and failure telemetry, keyed by logical target (task) name.
//!
//! Connections talk to an injected [`LoaderMetrics`] rather than process-wide
//! registries. [`PrometheusMetrics`] is the production sink;
//! [`InMemoryMetrics`] records observations for assertions in tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dm_metrics_proxy::{HistogramVecProxy, IntCounterVecProxy};
use prometheus::{HistogramOpts, Opts, Registry};

/// Sink for the loader's connection-level metrics.
pub trait LoaderMetrics: Send + Sync {
    /// Latency of one successful read query, in seconds.
    fn observe_query(&self, task: &str, seconds: f64);

    /// Latency of one successful batch execution, in seconds.
    fn observe_txn(&self, task: &str, seconds: f64);

    /// One failed batch execution attempt.
    fn inc_execution_error(&self, task: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl LoaderMetrics for NoopMetrics {
    fn observe_query(&self, _task: &str, _seconds: f64) {}

    fn observe_txn(&self, _task: &str, _seconds: f64) {}

    fn inc_execution_error(&self, _task: &str) {}
}

pub const LABEL_TASK: &str = "task";

/// Prometheus-backed sink. Series are created through metric proxies so a
/// finished task's series can be dropped with [`Self::remove_task_metrics`].
pub struct PrometheusMetrics {
    query_histogram: HistogramVecProxy,
    txn_histogram: HistogramVecProxy,
    execution_error_counter: IntCounterVecProxy,
}

impl PrometheusMetrics {
    pub fn new() -> dm_metrics_proxy::Result<Self> {
        let buckets = prometheus::exponential_buckets(0.000005, 2.0, 25)?;

        let query_histogram = dm_metrics_proxy::new_histogram_vec(
            HistogramOpts::new("query_duration_time", "Bucketed histogram of query time (s)")
                .namespace("dm")
                .subsystem("loader")
                .buckets(buckets.clone()),
            &[LABEL_TASK],
        )?;
        let txn_histogram = dm_metrics_proxy::new_histogram_vec(
            HistogramOpts::new(
                "txn_duration_time",
                "Bucketed histogram of processing time (s) of a txn",
            )
            .namespace("dm")
            .subsystem("loader")
            .buckets(buckets),
            &[LABEL_TASK],
        )?;
        let execution_error_counter = dm_metrics_proxy::new_int_counter_vec(
            Opts::new(
                "tidb_execution_error",
                "Total count of tidb execution errors",
            )
            .namespace("dm")
            .subsystem("loader"),
            &[LABEL_TASK],
        )?;

        Ok(Self {
            query_histogram,
            txn_histogram,
            execution_error_counter,
        })
    }

    /// Register all loader metrics with `registry`.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.query_histogram.inner().clone()))?;
        registry.register(Box::new(self.txn_histogram.inner().clone()))?;
        registry.register(Box::new(self.execution_error_counter.inner().clone()))?;
        Ok(())
    }

    /// Drop every series labelled with `task`. Returns false if any
    /// deletion failed.
    pub fn remove_task_metrics(&self, task: &str) -> bool {
        let labels: HashMap<&str, &str> = [(LABEL_TASK, task)].into_iter().collect();
        let query = self.query_histogram.delete_all_about_labels(&labels);
        let txn = self.txn_histogram.delete_all_about_labels(&labels);
        let errors = self.execution_error_counter.delete_all_about_labels(&labels);
        query && txn && errors
    }
}

impl LoaderMetrics for PrometheusMetrics {
    fn observe_query(&self, task: &str, seconds: f64) {
        match self.query_histogram.with_label_values(&[task]) {
            Ok(histogram) => histogram.observe(seconds),
            Err(err) => tracing::warn!(task, error = %err, "failed to record query latency"),
        }
    }

    fn observe_txn(&self, task: &str, seconds: f64) {
        match self.txn_histogram.with_label_values(&[task]) {
            Ok(histogram) => histogram.observe(seconds),
            Err(err) => tracing::warn!(task, error = %err, "failed to record txn latency"),
        }
    }

    fn inc_execution_error(&self, task: &str) {
        match self.execution_error_counter.with_label_values(&[task]) {
            Ok(counter) => counter.inc(),
            Err(err) => tracing::warn!(task, error = %err, "failed to count execution error"),
        }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    query: HashMap<String, Vec<f64>>,
    txn: HashMap<String, Vec<f64>>,
    execution_errors: HashMap<String, u64>,
}

/// Records every observation in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    recorded: Mutex<Recorded>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_observations(&self, task: &str) -> Vec<f64> {
        self.lock().query.get(task).cloned().unwrap_or_default()
    }

    pub fn txn_observations(&self, task: &str) -> Vec<f64> {
        self.lock().txn.get(task).cloned().unwrap_or_default()
    }

    pub fn execution_errors(&self, task: &str) -> u64 {
        self.lock().execution_errors.get(task).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LoaderMetrics for InMemoryMetrics {
    fn observe_query(&self, task: &str, seconds: f64) {
        self.lock()
            .query
            .entry(task.to_string())
            .or_default()
            .push(seconds);
    }

    fn observe_txn(&self, task: &str, seconds: f64) {
        self.lock()
            .txn
            .entry(task.to_string())
            .or_default()
            .push(seconds);
    }

    fn inc_execution_error(&self, task: &str) {
        *self
            .lock()
            .execution_errors
            .entry(task.to_string())
            .or_default() += 1;
    }
}
