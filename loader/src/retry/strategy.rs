//! Bounded retry loop
//!
//! Runs an operation, asks the call-site predicate whether a failure is worth
//! another attempt, and sleeps between attempts according to the backoff
//! shape. The operation and every sleep race the caller's [`Context`].

use std::future::Future;
use std::time::Duration;

use dm_async_utils::{Context, OrCancelExt};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Stable,
    /// Delay before retry `k` is `k * first_retry_duration`.
    LinearIncrease,
}

impl BackoffStrategy {
    /// Delay to wait after the `retry`-th failed attempt (1-based).
    pub fn backoff_duration(self, first_retry_duration: Duration, retry: usize) -> Duration {
        match self {
            BackoffStrategy::Stable => first_retry_duration,
            BackoffStrategy::LinearIncrease => {
                let factor = u32::try_from(retry.max(1)).unwrap_or(u32::MAX);
                first_retry_duration.saturating_mul(factor)
            }
        }
    }
}

/// Predicate deciding whether a failure should be retried. Receives the
/// 1-based number of the attempt that just failed.
pub type RetryableFn<'a> = Box<dyn Fn(usize, &DbError) -> bool + Send + Sync + 'a>;

/// One call-site's retry policy.
pub struct RetryParams<'a> {
    /// Attempt ceiling, including the first attempt.
    pub retry_count: usize,
    pub first_retry_duration: Duration,
    pub backoff_strategy: BackoffStrategy,
    pub is_retryable_fn: RetryableFn<'a>,
}

impl<'a> RetryParams<'a> {
    pub fn new(
        retry_count: usize,
        first_retry_duration: Duration,
        backoff_strategy: BackoffStrategy,
        is_retryable_fn: impl Fn(usize, &DbError) -> bool + Send + Sync + 'a,
    ) -> Self {
        Self {
            retry_count,
            first_retry_duration,
            backoff_strategy,
            is_retryable_fn: Box::new(is_retryable_fn),
        }
    }
}

impl std::fmt::Debug for RetryParams<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryParams")
            .field("retry_count", &self.retry_count)
            .field("first_retry_duration", &self.first_retry_duration)
            .field("backoff_strategy", &self.backoff_strategy)
            .finish_non_exhaustive()
    }
}

/// Result of [`apply_retry_strategy`] plus the number of attempts made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: usize,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T> {
        self.result
    }
}

/// Execute `operation` until it succeeds, the predicate declines, the attempt
/// ceiling is reached, or `ctx` finishes.
///
/// No sleep follows the final attempt. Cancellation or an elapsed deadline
/// is reported as [`DbError::Cancelled`] / [`DbError::DeadlineExceeded`],
/// never as the last operation error.
pub async fn apply_retry_strategy<T, F, Fut>(
    ctx: &Context,
    params: &RetryParams<'_>,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    let mut attempts = 0usize;

    loop {
        if let Some(cancel) = ctx.err() {
            return RetryOutcome {
                result: Err(cancel.into()),
                attempts,
            };
        }

        attempts += 1;
        let err = match operation().or_cancel(ctx).await {
            Ok(Ok(value)) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Ok(Err(err)) => err,
            Err(cancel) => {
                return RetryOutcome {
                    result: Err(cancel.into()),
                    attempts,
                };
            }
        };

        if !(params.is_retryable_fn)(attempts, &err) || attempts >= params.retry_count {
            return RetryOutcome {
                result: Err(err),
                attempts,
            };
        }

        let delay = params
            .backoff_strategy
            .backoff_duration(params.first_retry_duration, attempts);
        if let Err(cancel) = ctx.sleep(delay).await {
            tracing::debug!(attempts, "retry backoff interrupted: {cancel}");
            return RetryOutcome {
                result: Err(cancel.into()),
                attempts,
            };
        }
    }
}
