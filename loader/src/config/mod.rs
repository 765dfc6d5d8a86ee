//! Loader configuration
//!
//! Layered loading (defaults → file → `DM_LOADER_*` environment) lives in
//! [`loader`]; this module holds the typed configuration tree.

pub mod error;
pub mod loader;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::BackoffStrategy;

pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;

/// Configuration of one load task against one downstream target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Logical target name, used as the metrics label.
    #[serde(default)]
    pub name: String,

    /// Downstream database.
    #[serde(default)]
    pub to: DbConfig,

    /// Policy for read queries.
    #[serde(default = "default_query_retry")]
    pub query_retry: RetryPolicy,

    /// Policy for batched statement execution.
    #[serde(default = "default_execute_retry")]
    pub execute_retry: RetryPolicy,

    /// Successful calls slower than this are logged as warnings.
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,

    #[serde(default)]
    pub faults: FaultConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Connection settings for a database endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Session variables applied on every new connection.
    #[serde(default)]
    pub session: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_allowed_packet: Option<u64>,
}

/// Retry policy for one call-site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt ceiling, including the first attempt.
    pub max_attempts: usize,

    pub first_retry_ms: u64,

    pub backoff: BackoffStrategy,
}

/// Deterministic fault injection for tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultConfig {
    /// When set, a single `CREATE TABLE` batch fails with this server error
    /// number instead of executing.
    #[serde(default)]
    pub create_table_error_code: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_query_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 10,
        first_retry_ms: 1000,
        backoff: BackoffStrategy::Stable,
    }
}
fn default_execute_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 10,
        first_retry_ms: 2000,
        backoff: BackoffStrategy::LinearIncrease,
    }
}
fn default_slow_threshold_ms() -> u64 {
    1000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4000
}
fn default_user() -> String {
    "root".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl RetryPolicy {
    pub fn first_retry_duration(&self) -> Duration {
        Duration::from_millis(self.first_retry_ms)
    }
}

impl LoaderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    /// Reject values no load task can run with.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "name cannot be empty".to_string(),
            ));
        }
        if self.to.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "to.host cannot be empty".to_string(),
            ));
        }
        if self.to.port == 0 {
            return Err(ConfigError::ValidationError(
                "to.port must be > 0".to_string(),
            ));
        }
        for (field, policy) in [
            ("query_retry", &self.query_retry),
            ("execute_retry", &self.execute_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{field}.max_attempts must be >= 1"
                )));
            }
        }
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            to: DbConfig::default(),
            query_retry: default_query_retry(),
            execute_retry: default_execute_retry(),
            slow_threshold_ms: default_slow_threshold_ms(),
            faults: FaultConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            session: HashMap::new(),
            max_allowed_packet: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("session", &self.session)
            .field("max_allowed_packet", &self.max_allowed_packet)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_policies_match_call_sites() {
        let config = LoaderConfig::default();
        assert_eq!(config.query_retry.max_attempts, 10);
        assert_eq!(config.query_retry.first_retry_duration(), Duration::from_secs(1));
        assert_eq!(config.query_retry.backoff, BackoffStrategy::Stable);
        assert_eq!(config.execute_retry.max_attempts, 10);
        assert_eq!(config.execute_retry.first_retry_duration(), Duration::from_secs(2));
        assert_eq!(config.execute_retry.backoff, BackoffStrategy::LinearIncrease);
        assert_eq!(config.slow_threshold(), Duration::from_secs(1));
        assert_eq!(config.faults.create_table_error_code, None);
    }

    #[test]
    fn validate_requires_name() {
        assert!(LoaderConfig::default().validate().is_err());
        assert!(LoaderConfig::new("task-1").validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = LoaderConfig::new("task-1");
        config.execute_retry.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("execute_retry.max_attempts"));
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut config = LoaderConfig::new("task-1");
        config.to.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_hides_password() {
        let mut db = DbConfig::default();
        db.password = "hunter2".to_string();
        let rendered = format!("{db:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
