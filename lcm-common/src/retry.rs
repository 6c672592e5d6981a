//! Retry executor with linear backoff.
//!
//! Wraps an async operation that may fail transiently. Exhaustion is not an
//! error: the caller receives a [`RetryOutcome`] whose `value` is `None` and
//! decides whether to proceed degraded.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;

use crate::logging::{EventLog, LogLevel, LogSource};

/// Retry policy for transient operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first try (minimum 1).
    pub max_retries: u32,
    /// Base delay; the wait after attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay slept after a failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt.max(1))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// One attempt made by [`retry_with_backoff`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub max_attempts: u32,
    /// Delay slept after this attempt. Zero for the last attempt and for successes.
    #[serde(with = "duration_ms")]
    pub backoff: Duration,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// `None` when every attempt failed.
    pub value: Option<T>,
    pub attempts: Vec<RetryAttempt>,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.value.is_some()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Total time spent sleeping between attempts.
    pub fn total_backoff(&self) -> Duration {
        self.attempts.iter().map(|a| a.backoff).sum()
    }

    pub fn into_option(self) -> Option<T> {
        self.value
    }
}

/// Run an async operation up to `policy.max_attempts()` times.
///
/// After a failed attempt `n` (that is not the last) the executor sleeps
/// `policy.delay_for(n)`. Every attempt is recorded in the event log.
pub async fn retry_with_backoff<F, Fut, T, E>(
    log: &EventLog,
    label: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = Vec::with_capacity(max_attempts as usize);

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => {
                log.log_with_context(
                    LogLevel::Debug,
                    LogSource::Retry,
                    format!("{label}: attempt {attempt}/{max_attempts} succeeded"),
                    vec![("attempt".to_string(), attempt.to_string())],
                );
                attempts.push(RetryAttempt {
                    attempt_number: attempt,
                    max_attempts,
                    backoff: Duration::ZERO,
                    succeeded: true,
                    error: None,
                });
                return RetryOutcome {
                    value: Some(value),
                    attempts,
                };
            }
            Err(err) => {
                let is_last = attempt == max_attempts;
                let backoff = if is_last {
                    Duration::ZERO
                } else {
                    policy.delay_for(attempt)
                };
                log.log_with_context(
                    LogLevel::Warn,
                    LogSource::Retry,
                    format!("{label}: attempt {attempt}/{max_attempts} failed: {err}"),
                    vec![
                        ("attempt".to_string(), attempt.to_string()),
                        ("backoff_ms".to_string(), backoff.as_millis().to_string()),
                    ],
                );
                attempts.push(RetryAttempt {
                    attempt_number: attempt,
                    max_attempts,
                    backoff,
                    succeeded: false,
                    error: Some(err.to_string()),
                });
                if !is_last {
                    sleep(backoff).await;
                }
            }
        }
    }

    log.warn(
        LogSource::Retry,
        format!("{label}: giving up after {max_attempts} attempts"),
    );
    RetryOutcome {
        value: None,
        attempts,
    }
}

pub(crate) mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32, backoff_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(backoff_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let log = EventLog::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let start = Instant::now();

        let outcome = retry_with_backoff(&log, "preload", &policy(3, 1000), move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err("not yet") } else { Ok(n) }
            }
        })
        .await;

        assert_eq!(outcome.value, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000ms after attempt 1, 2000ms after attempt 2
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
        assert_eq!(outcome.total_backoff(), Duration::from_millis(3000));
        assert!(outcome.attempts[2].succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_sentinel_without_trailing_sleep() {
        let log = EventLog::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let start = Instant::now();

        let outcome: RetryOutcome<()> =
            retry_with_backoff(&log, "always fails", &policy(3, 100), move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom")
                }
            })
            .await;

        assert!(!outcome.succeeded());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        assert_eq!(outcome.attempts.last().map(|a| a.backoff), Some(Duration::ZERO));
        assert_eq!(log.search("giving up").len(), 1);
        assert_eq!(log.warn_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_clamped_to_one_attempt() {
        let log = EventLog::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let outcome: RetryOutcome<()> = retry_with_backoff(&log, "once", &policy(0, 50), move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("nope")
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempt_count(), 1);
        assert_eq!(outcome.attempts[0].max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_never_sleeps() {
        let log = EventLog::default();
        let start = Instant::now();
        let outcome = retry_with_backoff(&log, "fast", &RetryPolicy::default(), || async {
            Ok::<_, String>("ready")
        })
        .await;
        assert_eq!(outcome.into_option(), Some("ready"));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_delays_strictly_increase(backoff_ms in 1u64..10_000, attempts in 2u32..20) {
            let p = policy(attempts, backoff_ms);
            for n in 1..attempts {
                prop_assert!(p.delay_for(n + 1) > p.delay_for(n));
                prop_assert_eq!(p.delay_for(n), Duration::from_millis(backoff_ms * n as u64));
            }
        }
    }
}
