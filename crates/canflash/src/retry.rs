//! Bounded retry with cancellation

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RetryConfig;

/// How many times to try and how long to pause in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub attempts: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        (&RetryConfig::default()).into()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation failed with an error the predicate refused to retry
    #[error("{0}")]
    Fatal(E),
}

impl<E> RetryError<E> {
    /// Collapse to the last operation error; `cancelled` builds one for cancellation
    pub fn into_last(self, cancelled: impl FnOnce() -> E) -> E {
        match self {
            RetryError::Cancelled { .. } => cancelled(),
            RetryError::Exhausted { last, .. } | RetryError::Fatal(last) => last,
        }
    }
}

/// Run `op` until it succeeds, `should_retry` rejects its error, the policy's
/// attempts run out or `cancel` fires
///
/// Cancellation is checked before every attempt and interrupts the pause
/// between attempts. An attempt already in flight is expected to observe
/// the same token itself.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut should_retry: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !should_retry(&err) {
            return Err(RetryError::Fatal(err));
        }
        if attempt >= attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }
        debug!(attempt, max = attempts, error = %err, "Retrying");

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Instant;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let cancel = CancellationToken::new();
        let calls = Cell::new(0);

        let result = retry(&policy(5), &cancel, |_: &&str| true, |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 3 {
                    Err("not ready")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_limit() {
        let cancel = CancellationToken::new();
        let calls = Cell::new(0);

        let result: Result<(), _> = retry(&policy(10), &cancel, |_: &&str| true, |_| {
            calls.set(calls.get() + 1);
            async { Err("not ready") }
        })
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 10,
                last: "not ready"
            })
        );
        assert_eq!(calls.get(), 10);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let cancel = CancellationToken::new();
        let calls = Cell::new(0);

        let result: Result<(), _> = retry(&policy(10), &cancel, |e: &&str| *e != "rejected", |_| {
            calls.set(calls.get() + 1);
            async { Err("rejected") }
        })
        .await;

        assert_eq!(result, Err(RetryError::Fatal("rejected")));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pause() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let slow = RetryPolicy {
            attempts: 10,
            delay: Duration::from_secs(10),
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result: Result<(), _> =
            retry(&slow, &cancel, |_: &&str| true, |_| async { Err("not ready") }).await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_into_last() {
        let err: RetryError<&str> = RetryError::Cancelled { attempts: 2 };
        assert_eq!(err.into_last(|| "cancelled"), "cancelled");
        let err = RetryError::Exhausted {
            attempts: 10,
            last: "busy",
        };
        assert_eq!(err.into_last(|| "cancelled"), "busy");
    }
}
