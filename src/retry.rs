use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// One attempt plus exactly one retry.
    pub fn single_retry(delay: Duration) -> Self {
        Self {
            max_attempts: 2,
            delay,
        }
    }
}

/// How a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// Worth trying again after the delay.
    Retryable(E),
    /// Trying again cannot help.
    Fatal(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
    Aborted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Aborted { attempts, .. } => *attempts,
        }
    }
}

/// Runs `operation` until it succeeds, fails fatally, or `max_attempts` is
/// reached, sleeping `delay` between attempts. The closure receives the
/// 1-based attempt number.
pub async fn retry_bounded<T, E, F, Fut>(policy: RetryPolicy, mut operation: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(AttemptError::Fatal(error)) => {
                return RetryOutcome::Aborted {
                    error,
                    attempts: attempt,
                }
            }
            Err(AttemptError::Retryable(error)) => {
                if attempt >= max_attempts {
                    return RetryOutcome::Exhausted {
                        last_error: error,
                        attempts: attempt,
                    };
                }
                tracing::debug!(
                    "Attempt {}/{} failed; retrying in {:?}",
                    attempt,
                    max_attempts,
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_after_single_retry() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome: RetryOutcome<(), &str> =
            retry_bounded(RetryPolicy::single_retry(Duration::ZERO), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Retryable("down"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                last_error: "down",
                attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let outcome: RetryOutcome<u32, &str> =
            retry_bounded(RetryPolicy::single_retry(Duration::ZERO), |n| async move {
                if n == 1 {
                    Err(AttemptError::Retryable("flaky"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(outcome, RetryOutcome::Success { value: 2, attempts: 2 });
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome: RetryOutcome<(), &str> =
            retry_bounded(RetryPolicy::single_retry(Duration::ZERO), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Fatal("no key"))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_configured_delay_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: RetryOutcome<(), ()> = retry_bounded(
            RetryPolicy::single_retry(Duration::from_secs(2)),
            |_| async { Err(AttemptError::Retryable(())) },
        )
        .await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
