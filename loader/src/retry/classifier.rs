//! Error classification for retry decisions
//!
//! Every predicate here is total: an error whose root cause is not a
//! recognised vendor error simply answers `false` / `None`.

use crate::error::{DbError, codes};

/// Top-level error classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient errors that should be retried with backoff
    Retryable(RetryableError),

    /// Permanent errors that should NOT be retried
    Permanent(PermanentError),

    /// Caller cancelled or the deadline elapsed
    Cancelled,
}

/// Transient errors (retry recommended)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryableError {
    #[error("bad connection")]
    BadConnection,

    #[error("network failure")]
    Network,

    #[error("lock wait timeout exceeded")]
    LockWaitTimeout,

    #[error("deadlock found when trying to get lock")]
    Deadlock,

    #[error("transaction conflict (code {0})")]
    TxnConflict(u16),

    #[error("information schema changed")]
    SchemaChanged,

    #[error("storage busy or unavailable (code {0})")]
    ServerBusy(u16),
}

/// Permanent errors (do NOT retry)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermanentError {
    #[error("database already exists")]
    DatabaseExists,

    #[error("table already exists")]
    TableExists,

    #[error("duplicate entry")]
    DuplicateEntry,

    #[error("server error {0}")]
    Vendor(u16),

    #[error("connection not valid")]
    ConnectionInvalid,

    #[error("unclassified error")]
    Unclassified,
}

/// Trait for error classification
pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable(_))
    }
}

/// Vendor error number at the root of `err`, if it is a server error.
pub fn vendor_code(err: &DbError) -> Option<u16> {
    match err.root_cause() {
        DbError::Vendor(e) => Some(e.number),
        _ => None,
    }
}

fn has_code(err: &DbError, code: u16) -> bool {
    vendor_code(err) == Some(code)
}

pub fn is_err_db_exists(err: &DbError) -> bool {
    has_code(err, codes::ER_DB_CREATE_EXISTS)
}

pub fn is_err_table_exists(err: &DbError) -> bool {
    has_code(err, codes::ER_TABLE_EXISTS)
}

/// Database-exists or table-exists.
pub fn is_object_exists(err: &DbError) -> bool {
    is_err_db_exists(err) || is_err_table_exists(err)
}

pub fn is_err_dup_entry(err: &DbError) -> bool {
    has_code(err, codes::ER_DUP_ENTRY)
}

/// Driver-level "is this a retryable network/lock condition".
pub fn is_retryable_error(err: &DbError) -> bool {
    err.is_retryable()
}
