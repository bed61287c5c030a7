//! Execution context: a deadline plus a cancellation signal.
//!
//! One root context is created per invocation. Inner operations derive their
//! own context with [`ExecContext::bounded`], which can only shorten the
//! deadline, so an inner retry never outlives its caller.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ExecContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl ExecContext {
    /// Root context expiring `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self::with_cancel(timeout, CancellationToken::new())
    }

    /// Root context driven by an externally owned token (ctrl-c, for example).
    pub fn with_cancel(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Same token, deadline capped at `timeout` from now.
    pub fn bounded(&self, timeout: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + timeout),
            cancel: self.cancel.clone(),
        }
    }

    /// Same deadline, child token: cancelling the child leaves the parent
    /// running, cancelling the parent cancels the child.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// Drive `fut` to completion unless the context ends first.
    ///
    /// Cancellation yields `Error::Cancelled`, the deadline
    /// `Error::DeadlineExceeded` naming `activity`. `fut` is dropped in
    /// both cases.
    pub async fn guard<T>(
        &self,
        activity: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.done() => {
                if self.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    Err(Error::DeadlineExceeded(activity.to_string()))
                }
            }
            result = fut => result,
        }
    }
}
