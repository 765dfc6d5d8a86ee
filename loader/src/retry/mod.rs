//! Retry logic for database operations
//!
//! This module provides:
//! - Error classification (retryable vs permanent, named vendor conditions)
//! - A bounded retry loop with stable or linearly increasing backoff
//! - Cancellation support through the caller's `Context`

pub mod classifier;
pub mod strategy;

pub use classifier::{
    ErrorClass, PermanentError, RetryClassifiable, RetryableError, is_err_db_exists,
    is_err_dup_entry, is_err_table_exists, is_object_exists, is_retryable_error, vendor_code,
};
pub use strategy::{BackoffStrategy, RetryOutcome, RetryParams, RetryableFn, apply_retry_strategy};
