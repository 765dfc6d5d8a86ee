//! Fault injection for deterministic error-path testing
//!
//! A [`FaultInjector`] is consulted before a batch reaches the driver. When
//! it returns an error, that error stands in for the execution result and
//! flows through the normal retry, metrics and logging path.
//!
//! ## Configuration
//! ```bash
//! DM_LOADER_FAULT_CREATE_TABLE=1050   # single CREATE TABLE batches fail with 1050
//! ```
//! or `faults.create_table_error_code` in the loader config file.

use std::sync::Arc;

use crate::config::FaultConfig;
use crate::error::{DbError, Result};

/// Environment variable read by [`faults_from_env`].
pub const CREATE_TABLE_FAULT_ENV: &str = "DM_LOADER_FAULT_CREATE_TABLE";

/// Decides whether a batch fails before it is executed.
pub trait FaultInjector: Send + Sync {
    fn inject(&self, queries: &[String]) -> Option<DbError>;
}

/// Never injects anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn inject(&self, _queries: &[String]) -> Option<DbError> {
        None
    }
}

/// Fails single-statement `CREATE TABLE` batches with a server error number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTableFault {
    pub code: u16,
}

impl CreateTableFault {
    pub fn new(code: u16) -> Self {
        Self { code }
    }

    /// Parse a base-10 server error number.
    pub fn parse(value: &str) -> Result<Self> {
        value
            .trim()
            .parse::<u16>()
            .map(Self::new)
            .map_err(|err| DbError::Other(format!("invalid fault error code {value:?}: {err}")))
    }

    fn matches(queries: &[String]) -> bool {
        matches!(queries, [only] if only.contains("CREATE TABLE"))
    }
}

impl FaultInjector for CreateTableFault {
    fn inject(&self, queries: &[String]) -> Option<DbError> {
        if !Self::matches(queries) {
            return None;
        }
        tracing::warn!(
            code = self.code,
            query = %queries[0],
            "[faults] injecting CREATE TABLE failure"
        );
        Some(DbError::vendor(self.code, "injected CREATE TABLE failure"))
    }
}

/// Build the injector described by `cfg`.
pub fn faults_from_config(cfg: &FaultConfig) -> Arc<dyn FaultInjector> {
    match cfg.create_table_error_code {
        Some(code) => Arc::new(CreateTableFault::new(code)),
        None => Arc::new(NoFaults),
    }
}

/// Build the injector described by [`CREATE_TABLE_FAULT_ENV`]. Unset means
/// no faults; an unparsable value is an error.
pub fn faults_from_env() -> Result<Arc<dyn FaultInjector>> {
    match std::env::var(CREATE_TABLE_FAULT_ENV) {
        Ok(value) => {
            let fault = CreateTableFault::parse(&value)?;
            tracing::info!(code = fault.code, "[faults] CREATE TABLE fault enabled");
            Ok(Arc::new(fault))
        }
        Err(_) => Ok(Arc::new(NoFaults)),
    }
}
