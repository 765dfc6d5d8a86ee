//! Cancellation-aware execution context.
//!
//! A [`Context`] bundles a `CancellationToken` with an optional deadline so a
//! single handle can be threaded through every retry attempt and backoff
//! sleep. [`OrCancelExt`] races any future against it.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reason a context stopped a piece of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelErr {
    /// The token was cancelled explicitly (or through a parent).
    Cancelled,
    /// The deadline attached to the context elapsed.
    DeadlineExceeded,
}

impl fmt::Display for CancelErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelErr::Cancelled => f.write_str("context canceled"),
            CancelErr::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl std::error::Error for CancelErr {}

/// Caller-supplied execution context.
///
/// Cloning is cheap and clones share the same token. Use [`Context::child`]
/// or [`Context::with_timeout`] to derive a context that can be cancelled
/// without affecting the parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A root context that is never done unless cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a child context. Cancelling the parent cancels the child, not
    /// the other way around. The deadline is inherited.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child context that expires `timeout` from now (or earlier if
    /// the parent already has a tighter deadline).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context that expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Non-blocking check. Explicit cancellation wins over an elapsed deadline.
    pub fn err(&self) -> Option<CancelErr> {
        if self.token.is_cancelled() {
            return Some(CancelErr::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelErr::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline elapses.
    pub async fn done(&self) -> CancelErr {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => CancelErr::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CancelErr::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                CancelErr::Cancelled
            }
        }
    }

    /// Sleep for `duration` unless the context finishes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CancelErr> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::time::sleep(duration).or_cancel(self).await
    }
}

/// Extension trait for making futures cancellable.
///
/// Races the future against a [`Context`], returning the context's
/// [`CancelErr`] if it finishes first. An already-finished context never
/// polls the future.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    async fn or_cancel(self, ctx: &Context) -> Result<Self::Output, CancelErr>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, ctx: &Context) -> Result<Self::Output, CancelErr> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            res = self => Ok(res),
        }
    }
}
