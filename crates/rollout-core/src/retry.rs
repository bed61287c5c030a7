//! Bounded retry loop.
//!
//! Run the operation, classify a failure with the caller's predicate, sleep a
//! fixed interval, repeat until success, a fatal error, cancellation or the
//! deadline.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::{Error, ExecContext};

/// Interval and overall budget for one retry boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Sleep between attempts.
    pub interval: Duration,
    /// Budget for all attempts; further capped by the caller's context.
    pub timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Why a retry loop gave up.
#[derive(Debug)]
pub enum RetryError {
    /// A non-retriable error, or cancellation. Propagate unchanged.
    Fatal(Error),
    /// The deadline passed; carries the last retriable error observed.
    Exhausted(Error),
}

impl RetryError {
    /// Collapse into an [`Error`], wrapping exhaustion with `on_exhausted`.
    pub fn into_error(self, on_exhausted: impl FnOnce(Error) -> Error) -> Error {
        match self {
            RetryError::Fatal(err) => err,
            RetryError::Exhausted(last) => on_exhausted(last),
        }
    }
}

/// Retry `op` while `retriable` accepts its error.
///
/// Every attempt races the deadline and the cancellation token: an attempt
/// still running at the deadline is dropped and the loop reports
/// `Exhausted` with the previous attempt's error (or `DeadlineExceeded` when
/// there was none). Cancellation turns into `Fatal(Error::Cancelled)`.
pub async fn on_error<T, F, Fut, P>(
    ctx: &ExecContext,
    options: RetryOptions,
    retriable: P,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
    P: Fn(&Error) -> bool,
{
    let scope = ctx.bounded(options.timeout);
    let mut attempt: u32 = 0;
    let mut last: Option<Error> = None;

    loop {
        if scope.is_cancelled() {
            return Err(RetryError::Fatal(Error::Cancelled));
        }

        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = scope.cancellation().cancelled() => {
                return Err(RetryError::Fatal(Error::Cancelled));
            }
            _ = tokio::time::sleep_until(scope.deadline()) => {
                let last = last.unwrap_or_else(|| {
                    Error::DeadlineExceeded(format!("running attempt {}", attempt))
                });
                return Err(RetryError::Exhausted(last));
            }
            outcome = op() => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if retriable(&err) => err,
            Err(err) => return Err(RetryError::Fatal(err)),
        };

        debug!(attempt, remaining = ?scope.remaining(), error = %err, "error caught, retrying");

        tokio::select! {
            biased;
            _ = scope.cancellation().cancelled() => {
                return Err(RetryError::Fatal(Error::Cancelled));
            }
            _ = tokio::time::sleep_until(scope.deadline()) => {
                return Err(RetryError::Exhausted(err));
            }
            _ = tokio::time::sleep(options.interval) => last = Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient(err: &Error) -> bool {
        matches!(err, Error::PushFailed(_))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_errors() {
        let ctx = ExecContext::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = on_error(&ctx, RetryOptions::default(), transient, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::PushFailed("connection reset".to_string()))
                } else {
                    Ok("pushed")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "pushed");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let ctx = ExecContext::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = on_error(&ctx, RetryOptions::default(), transient, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Git("not a git repository".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(Error::Git(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_yields_last_error() {
        let ctx = ExecContext::new(Duration::from_secs(60));
        let options = RetryOptions::new(Duration::from_secs(1), Duration::from_millis(2500));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = on_error(&ctx, options, transient, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::PushFailed(format!("attempt {}", n + 1)))
            }
        })
        .await;

        match result {
            Err(RetryError::Exhausted(Error::PushFailed(msg))) => assert_eq!(msg, "attempt 3"),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_deadline_caps_inner_budget() {
        let ctx = ExecContext::new(Duration::from_secs(2));
        let options = RetryOptions::new(Duration::from_secs(1), Duration::from_secs(600));
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = on_error(&ctx, options, transient, || async {
            Err(Error::PushFailed("busy".to_string()))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted(_))));
        assert!(start.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_attempt_stops_at_deadline() {
        let ctx = ExecContext::new(Duration::from_secs(5));
        let options = RetryOptions::new(Duration::from_secs(1), Duration::from_secs(5));
        let start = tokio::time::Instant::now();

        let result: Result<(), _> =
            on_error(&ctx, options, transient, std::future::pending).await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted(Error::DeadlineExceeded(_)))
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_attempt_keeps_previous_error() {
        let ctx = ExecContext::new(Duration::from_secs(60));
        let options = RetryOptions::new(Duration::from_secs(1), Duration::from_secs(10));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = on_error(&ctx, options, transient, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::PushFailed("connection reset".to_string()))
                } else {
                    std::future::pending().await
                }
            }
        })
        .await;

        match result {
            Err(RetryError::Exhausted(Error::PushFailed(msg))) => {
                assert_eq!(msg, "connection reset")
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_running_attempt() {
        let ctx = ExecContext::new(Duration::from_secs(300));
        let options = RetryOptions::new(Duration::from_secs(1), Duration::from_secs(300));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let start = tokio::time::Instant::now();

        let result: Result<(), _> =
            on_error(&ctx, options, transient, std::future::pending).await;

        assert!(matches!(result, Err(RetryError::Fatal(Error::Cancelled))));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancellation_is_fatal() {
        let ctx = ExecContext::new(Duration::from_secs(60));
        ctx.cancel();

        let result: Result<(), _> = on_error(&ctx, RetryOptions::default(), transient, || async {
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(Error::Cancelled))));
    }

    #[test]
    fn test_into_error_wraps_exhaustion_only() {
        let wrapped = RetryError::Exhausted(Error::PushFailed("x".to_string()))
            .into_error(|last| Error::PushTimeout { last: Box::new(last) });
        assert!(matches!(wrapped, Error::PushTimeout { .. }));

        let fatal = RetryError::Fatal(Error::Cancelled)
            .into_error(|last| Error::PushTimeout { last: Box::new(last) });
        assert!(matches!(fatal, Error::Cancelled));
    }
}
