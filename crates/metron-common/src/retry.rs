//! Fixed-schedule retry for operations that may fail transiently.
//!
//! An operation reports each failure as either [`Failure::Retryable`] or
//! [`Failure::Permanent`]. Only retryable failures are attempted again, after
//! waiting the next delay of the [`Backoff`] schedule. The wait is cancellable.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wait schedule used when none is configured: try now, then after 1s, 3s and 5s.
pub const DEFAULT_SCHEDULE_SECS: [u64; 4] = [0, 1, 3, 5];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    delays: Vec<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_SCHEDULE_SECS)
    }
}

impl Backoff {
    /// Builds a schedule with one attempt per entry. The first entry is the
    /// wait before the first attempt. An empty schedule means a single
    /// immediate attempt.
    pub fn new(delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            return Self {
                delays: vec![Duration::ZERO],
            };
        }
        Self { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    /// A single attempt with no retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Classification of one failed attempt.
#[derive(Debug)]
pub enum Failure<E> {
    /// Transient; eligible for another attempt.
    Retryable(E),
    /// Returned to the caller immediately.
    Permanent(E),
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("{0}")]
    Permanent(E),

    #[error("retry timed out after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },

    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: usize, last: Option<E> },
}

impl<E> RetryError<E> {
    /// The last underlying failure, if any attempt was made.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Permanent(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Runs `op` following the `backoff` schedule.
///
/// Returns as soon as `op` succeeds or fails permanently. When every attempt
/// failed with a retryable error the last one is wrapped in
/// [`RetryError::Exhausted`]. If `cancel` fires while waiting between
/// attempts, returns [`RetryError::Cancelled`] without waiting further.
pub async fn retry_handle<T, E, F, Fut>(
    backoff: &Backoff,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: std::fmt::Display,
{
    let delays = backoff.delays();
    let mut last = None;
    for (attempt, delay) in delays.iter().enumerate() {
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt, last });
                }
                _ = tokio::time::sleep(*delay) => {}
            }
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(Failure::Permanent(e)) => return Err(RetryError::Permanent(e)),
            Err(Failure::Retryable(e)) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = delays.len(),
                    error = %e,
                    "Retryable failure"
                );
                if attempt + 1 == delays.len() {
                    return Err(RetryError::Exhausted {
                        attempts: delays.len(),
                        last: e,
                    });
                }
                last = Some(e);
            }
        }
    }
    Err(RetryError::Cancelled { attempts: 0, last })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_without_waiting() {
        let start = Instant::now();
        let result: Result<u32, RetryError<String>> =
            retry_handle(&Backoff::default(), &CancellationToken::new(), || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_on_schedule() {
        let calls = &AtomicUsize::new(0);
        let start = Instant::now();
        let result = retry_handle(&Backoff::default(), &CancellationToken::new(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Failure::Retryable("connection refused".to_string()))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(1 + 3));
        assert!(start.elapsed() < Duration::from_secs(1 + 3 + 5));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_returns_immediately() {
        let calls = &AtomicUsize::new(0);
        let start = Instant::now();
        let result: Result<(), _> = retry_handle(&Backoff::default(), &CancellationToken::new(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Failure::Permanent("syntax error".to_string()))
        })
        .await;
        assert!(matches!(result, Err(RetryError::Permanent(ref e)) if e == "syntax error"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_schedule_wraps_last_error() {
        let calls = &AtomicUsize::new(0);
        let start = Instant::now();
        let result: Result<(), _> = retry_handle(&Backoff::default(), &CancellationToken::new(), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(Failure::Retryable(format!("attempt {n}")))
        })
        .await;
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last, "attempt 3");
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(1 + 3 + 5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let cancel = CancellationToken::new();
        let calls = &AtomicUsize::new(0);
        let start = Instant::now();
        let token = &cancel;
        let result: Result<(), _> = retry_handle(&Backoff::default(), &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            token.cancel();
            Err(Failure::Retryable("busy".to_string()))
        })
        .await;
        match result {
            Err(RetryError::Cancelled { attempts, last }) => {
                assert_eq!(attempts, 1);
                assert_eq!(last.as_deref(), Some("busy"));
            }
            other => panic!("expected cancelled, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn empty_schedule_still_attempts_once() {
        assert_eq!(Backoff::new(Vec::new()).attempts(), 1);
        assert_eq!(Backoff::none().delays(), &[Duration::ZERO]);
    }
}
