//! Error types for loader database operations
//!
//! `DbError` is a causal chain: wrapper variants (`Context`, `Scoped`) nest a
//! boxed cause, leaf variants carry what the driver actually reported.
//! Classification always looks at the leaf via [`DbError::root_cause`].

use std::fmt;

use dm_async_utils::CancelErr;
use thiserror::Error;

use crate::retry::classifier::{ErrorClass, PermanentError, RetryClassifiable, RetryableError};

/// Loader result type alias
pub type Result<T> = std::result::Result<T, DbError>;

/// Context string used when adapting a raw driver failure.
pub const DRIVER_ERROR_CONTEXT: &str = "database driver error";

/// MySQL/TiDB server error numbers the loader cares about.
pub mod codes {
    pub const ER_DB_CREATE_EXISTS: u16 = 1007;
    pub const ER_TABLE_EXISTS: u16 = 1050;
    pub const ER_DUP_ENTRY: u16 = 1062;
    pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
    pub const ER_LOCK_DEADLOCK: u16 = 1213;
    pub const ER_TXN_RETRYABLE: u16 = 8022;
    pub const ER_INFO_SCHEMA_CHANGED: u16 = 8028;
    pub const ER_PD_SERVER_TIMEOUT: u16 = 9001;
    pub const ER_TIKV_SERVER_TIMEOUT: u16 = 9002;
    pub const ER_TIKV_SERVER_BUSY: u16 = 9003;
    pub const ER_RESOLVE_LOCK_TIMEOUT: u16 = 9004;
    pub const ER_REGION_UNAVAILABLE: u16 = 9005;
    pub const ER_WRITE_CONFLICT_IN_TIDB: u16 = 9007;
}

/// Server-side protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error {number}: {message}")]
pub struct MySqlError {
    pub number: u16,
    pub message: String,
}

/// Which side of a migration an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    NotSet,
    Upstream,
    Downstream,
    Internal,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorScope::NotSet => "not-set",
            ErrorScope::Upstream => "upstream",
            ErrorScope::Downstream => "downstream",
            ErrorScope::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Loader database error taxonomy
#[derive(Debug, Error)]
pub enum DbError {
    /// Operation attempted on an absent or closed connection.
    #[error("database connection not valid")]
    ConnectionInvalid,

    #[error(transparent)]
    Vendor(#[from] MySqlError),

    /// The driver reported the pooled connection as unusable.
    #[error("driver: bad connection")]
    BadConnection,

    #[error("invalid connection")]
    InvalidConnection,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<DbError>,
    },

    #[error("[scope: {scope}] {source}")]
    Scoped {
        scope: ErrorScope,
        source: Box<DbError>,
    },

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("{0}")]
    Other(String),
}

impl DbError {
    pub fn vendor(number: u16, message: impl Into<String>) -> Self {
        DbError::Vendor(MySqlError {
            number,
            message: message.into(),
        })
    }

    /// Wrap `self` with a human-readable context layer.
    pub fn context(self, context: impl Into<String>) -> Self {
        DbError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Tag `self` with the side of the migration it came from.
    pub fn with_scope(self, scope: ErrorScope) -> Self {
        DbError::Scoped {
            scope,
            source: Box::new(self),
        }
    }

    /// Adapt a raw provider/driver failure into a tagged driver error.
    /// Errors that already carry a driver context or a scope pass through.
    pub fn adapt_driver(self) -> Self {
        let adapted = match &self {
            DbError::Scoped { .. } => true,
            DbError::Context { context, .. } => context == DRIVER_ERROR_CONTEXT,
            _ => false,
        };
        if adapted {
            self
        } else {
            self.context(DRIVER_ERROR_CONTEXT)
        }
    }

    /// Walk wrapper layers down to the leaf error.
    pub fn root_cause(&self) -> &DbError {
        let mut current = self;
        loop {
            match current {
                DbError::Context { source, .. } | DbError::Scoped { source, .. } => {
                    current = source;
                }
                leaf => return leaf,
            }
        }
    }

    /// Outermost scope tag, `NotSet` when the chain carries none.
    pub fn scope(&self) -> ErrorScope {
        let mut current = self;
        loop {
            match current {
                DbError::Scoped { scope, .. } => return *scope,
                DbError::Context { source, .. } => current = source,
                _ => return ErrorScope::NotSet,
            }
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.root_cause(),
            DbError::Cancelled | DbError::DeadlineExceeded
        )
    }
}

impl From<CancelErr> for DbError {
    fn from(err: CancelErr) -> Self {
        match err {
            CancelErr::Cancelled => DbError::Cancelled,
            CancelErr::DeadlineExceeded => DbError::DeadlineExceeded,
        }
    }
}

impl From<String> for DbError {
    fn from(s: String) -> Self {
        DbError::Other(s)
    }
}

impl From<&str> for DbError {
    fn from(s: &str) -> Self {
        DbError::Other(s.to_string())
    }
}

impl RetryClassifiable for DbError {
    fn classify(&self) -> ErrorClass {
        use codes::*;

        match self.root_cause() {
            DbError::BadConnection | DbError::InvalidConnection => {
                ErrorClass::Retryable(RetryableError::BadConnection)
            }
            DbError::Io(err) => classify_io_error(err),
            DbError::Vendor(err) => match err.number {
                ER_LOCK_WAIT_TIMEOUT => ErrorClass::Retryable(RetryableError::LockWaitTimeout),
                ER_LOCK_DEADLOCK => ErrorClass::Retryable(RetryableError::Deadlock),
                ER_TXN_RETRYABLE | ER_WRITE_CONFLICT_IN_TIDB => {
                    ErrorClass::Retryable(RetryableError::TxnConflict(err.number))
                }
                ER_INFO_SCHEMA_CHANGED => ErrorClass::Retryable(RetryableError::SchemaChanged),
                ER_PD_SERVER_TIMEOUT
                | ER_TIKV_SERVER_TIMEOUT
                | ER_TIKV_SERVER_BUSY
                | ER_RESOLVE_LOCK_TIMEOUT
                | ER_REGION_UNAVAILABLE => {
                    ErrorClass::Retryable(RetryableError::ServerBusy(err.number))
                }
                ER_DB_CREATE_EXISTS => ErrorClass::Permanent(PermanentError::DatabaseExists),
                ER_TABLE_EXISTS => ErrorClass::Permanent(PermanentError::TableExists),
                ER_DUP_ENTRY => ErrorClass::Permanent(PermanentError::DuplicateEntry),
                other => ErrorClass::Permanent(PermanentError::Vendor(other)),
            },
            DbError::Cancelled | DbError::DeadlineExceeded => ErrorClass::Cancelled,
            DbError::ConnectionInvalid => ErrorClass::Permanent(PermanentError::ConnectionInvalid),
            _ => ErrorClass::Permanent(PermanentError::Unclassified),
        }
    }
}

// Helper: Classify std::io::Error based on ErrorKind
fn classify_io_error(err: &std::io::Error) -> ErrorClass {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut
        | ErrorKind::UnexpectedEof => ErrorClass::Retryable(RetryableError::Network),
        _ => ErrorClass::Permanent(PermanentError::Unclassified),
    }
}
