//! Instrumented connection
//!
//! [`DbConn`] wraps one pooled [`BaseConn`] and adds the call-site retry
//! policies, latency histograms, slow-statement warnings, the execution
//! failure counter and the fault-injection seam. A `DbConn` has one owner:
//! every operation takes `&mut self`, so the borrow checker rules out
//! concurrent calls on the same instance. Workers that need parallelism ask
//! the factory for one connection each.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dm_async_utils::Context;
use dm_utils_string::{truncate_debug, truncate_string};
use tokio::time::Instant;

use crate::config::LoaderConfig;
use crate::driver::{BaseConn, Rows, Value};
use crate::error::{DbError, Result};
use crate::faults::{FaultInjector, NoFaults};
use crate::metrics::{LoaderMetrics, NoopMetrics};
use crate::retry::{RetryParams, apply_retry_strategy, is_retryable_error};

/// A single-owner database connection with retry and instrumentation.
pub struct DbConn {
    base_conn: Option<Box<dyn BaseConn>>,
    cfg: Arc<LoaderConfig>,
    metrics: Arc<dyn LoaderMetrics>,
    faults: Arc<dyn FaultInjector>,
}

impl DbConn {
    pub fn new(
        base_conn: Box<dyn BaseConn>,
        cfg: Arc<LoaderConfig>,
        metrics: Arc<dyn LoaderMetrics>,
        faults: Arc<dyn FaultInjector>,
    ) -> Self {
        Self {
            base_conn: Some(base_conn),
            cfg,
            metrics,
            faults,
        }
    }

    /// Connection without metrics or faults.
    pub fn bare(base_conn: Box<dyn BaseConn>, cfg: Arc<LoaderConfig>) -> Self {
        Self::new(base_conn, cfg, Arc::new(NoopMetrics), Arc::new(NoFaults))
    }

    /// Resolve an optional connection, failing with
    /// [`DbError::ConnectionInvalid`] when it is absent.
    pub fn require(conn: Option<&mut DbConn>) -> Result<&mut DbConn> {
        conn.ok_or(DbError::ConnectionInvalid)
    }

    /// Logical target name; the metrics label.
    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    /// False once the connection has been closed.
    pub fn is_valid(&self) -> bool {
        self.base_conn.is_some()
    }

    /// Run a read query, retrying transient failures with the query policy.
    ///
    /// The returned error is the driver's own, so the classification
    /// predicates still apply to it.
    pub async fn query_sql(&mut self, ctx: &Context, query: &str, args: &[Value]) -> Result<Rows> {
        let Some(base) = self.base_conn.as_deref() else {
            return Err(DbError::ConnectionInvalid);
        };
        let task = self.cfg.name.as_str();
        let slow_threshold = self.cfg.slow_threshold();
        let metrics = self.metrics.as_ref();
        let policy = self.cfg.query_retry;

        let params = RetryParams::new(
            policy.max_attempts,
            policy.first_retry_duration(),
            policy.backoff,
            |retry, err| {
                if !is_retryable_error(err) {
                    return false;
                }
                tracing::warn!(
                    task,
                    retry,
                    query = %truncate_string(query, None),
                    argument = %truncate_debug(args, None),
                    error = %err,
                    "query statement failed, will retry"
                );
                true
            },
        );

        let outcome = apply_retry_strategy(ctx, &params, || async move {
            let started = Instant::now();
            let rows = base.query_sql(ctx, query, args).await?;
            let cost = started.elapsed();
            metrics.observe_query(task, cost.as_secs_f64());
            warn_if_slow(task, cost, slow_threshold, query, "query statement too slow");
            Ok(rows)
        })
        .await;

        outcome.result.inspect_err(|err| {
            tracing::error!(
                task,
                attempts = outcome.attempts,
                query = %truncate_string(query, None),
                argument = %truncate_debug(args, None),
                error = %err,
                "query statement failed"
            );
        })
    }

    /// Run `queries` as one transaction with the execute policy. An empty
    /// batch succeeds without touching the driver.
    ///
    /// Every failed attempt increments the execution error counter and is
    /// retried up to the attempt ceiling, whatever its class.
    pub async fn execute_sql(
        &mut self,
        ctx: &Context,
        queries: &[String],
        args: &[Vec<Value>],
    ) -> Result<()> {
        if queries.is_empty() {
            return Ok(());
        }
        let Some(base) = self.base_conn.as_deref() else {
            return Err(DbError::ConnectionInvalid);
        };
        let task = self.cfg.name.as_str();
        let slow_threshold = self.cfg.slow_threshold();
        let metrics = self.metrics.as_ref();
        let faults = self.faults.as_ref();
        let policy = self.cfg.execute_retry;

        let params = RetryParams::new(
            policy.max_attempts,
            policy.first_retry_duration(),
            policy.backoff,
            |retry, err| {
                tracing::warn!(
                    task,
                    retry,
                    query = %truncate_debug(queries, None),
                    argument = %truncate_debug(args, None),
                    retryable = is_retryable_error(err),
                    error = %err,
                    "execute statements failed"
                );
                metrics.inc_execution_error(task);
                true
            },
        );

        let outcome = apply_retry_strategy(ctx, &params, || async move {
            let started = Instant::now();
            if let Some(injected) = faults.inject(queries) {
                return Err(injected);
            }
            base.execute_sql(ctx, queries, args).await?;
            let cost = started.elapsed();
            metrics.observe_txn(task, cost.as_secs_f64());
            if cost > slow_threshold {
                tracing::warn!(
                    task,
                    cost_time = ?cost,
                    query = %truncate_debug(queries, None),
                    argument = %truncate_debug(args, None),
                    "execute transaction too slow"
                );
            }
            Ok(())
        })
        .await;

        outcome.result.inspect_err(|err| {
            tracing::error!(
                task,
                attempts = outcome.attempts,
                query = %truncate_debug(queries, None),
                argument = %truncate_debug(args, None),
                error = %err,
                "execute statements failed after retry"
            );
        })
    }

    /// Return the underlying connection to its pool. Closing twice is a
    /// no-op; every later operation fails with `ConnectionInvalid`.
    pub async fn close(&mut self) -> Result<()> {
        match self.base_conn.take() {
            Some(base) => base.close().await,
            None => Ok(()),
        }
    }
}

fn warn_if_slow(task: &str, cost: Duration, threshold: Duration, query: &str, message: &str) {
    if cost > threshold {
        tracing::warn!(
            task,
            cost_time = ?cost,
            query = %truncate_string(query, None),
            "{message}"
        );
    }
}

impl fmt::Debug for DbConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConn")
            .field("name", &self.cfg.name)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}
