//! Resilient database execution layer for the loader unit
//!
//! Wraps pooled connections to the downstream database with:
//! - error classification (transient vs. permanent, named vendor conditions)
//! - bounded retry with stable or linearly increasing backoff
//! - per-target latency histograms and an execution failure counter
//! - a fault-injection seam for exercising error paths without a real fault
//!
//! Callers get connections from [`ConnFactory`] and drive them through
//! [`DbConn::query_sql`] / [`DbConn::execute_sql`], passing a
//! [`Context`] that bounds every attempt and every backoff sleep.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod conn;
pub mod driver;
pub mod error;
pub mod factory;
pub mod faults;
pub mod logging;
pub mod metrics;
pub mod retry;

pub use config::{ConfigLoader, DbConfig, LoaderConfig, RetryPolicy};
pub use conn::DbConn;
pub use driver::{BaseConn, BaseDb, DbProvider, Rows, Value};
pub use error::{DbError, ErrorScope, MySqlError, Result};
pub use factory::ConnFactory;
pub use faults::{CreateTableFault, FaultInjector, NoFaults};
pub use metrics::{InMemoryMetrics, LoaderMetrics, NoopMetrics, PrometheusMetrics};
pub use retry::{
    BackoffStrategy, is_err_db_exists, is_err_dup_entry, is_err_table_exists, is_object_exists,
    is_retryable_error,
};

pub use dm_async_utils::{CancelErr, Context};
