//! Retry executor with exponential backoff for remote calls.
//!
//! Transient failures are retried:
//! - Timeouts
//! - 5xx server errors, 408 and 429
//! - Connection resets
//!
//! Permanent failures are returned after the first attempt:
//! - Other 4xx client errors
//! - Malformed responses and invalid input
//!
//! Each call also carries an overall deadline. When the deadline passes
//! during an attempt or would pass during a backoff sleep, the executor stops
//! and reports `DeadlineExceeded` instead of sleeping.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use tokio::time::Instant;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;
pub const DEFAULT_DEADLINE_SECS: u64 = 30;

/// Backoff settings. Configuration only, never mutated by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of random jitter added to every delay
    pub jitter: Duration,
    pub max_delay: Duration,
    /// Overall deadline for one call, retries included
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            multiplier: DEFAULT_MULTIPLIER,
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            deadline: Some(Duration::from_secs(DEFAULT_DEADLINE_SECS)),
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter or deadline, handy for deterministic callers
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            jitter: Duration::ZERO,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            deadline: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Delay after the given failed attempt (1-based), before jitter:
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay_ms = self.base_delay.as_millis() as f64 * factor;
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.delay_for_attempt(attempt) + Duration::from_millis(extra)
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

/// Errors that know whether retrying could help.
pub trait Retryable {
    fn retry_decision(&self) -> RetryDecision;
}

/// Check if a reqwest error is retryable
pub fn is_retryable_error(error: &reqwest::Error) -> RetryDecision {
    if error.is_timeout() {
        tracing::debug!("Request timed out, will retry");
        return RetryDecision::Retry;
    }

    if error.is_connect() {
        tracing::debug!("Connection error, will retry");
        return RetryDecision::Retry;
    }

    if error.is_request() {
        tracing::debug!("Request error, not retryable");
        return RetryDecision::NoRetry;
    }

    if let Some(status) = error.status() {
        return is_retryable_status(status);
    }

    RetryDecision::NoRetry
}

/// Check if a status code is retryable
pub fn is_retryable_status(status: StatusCode) -> RetryDecision {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        tracing::debug!("Status {} is transient, will retry", status);
        return RetryDecision::Retry;
    }

    RetryDecision::NoRetry
}

/// Why a retried call gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error("permanent failure on attempt {attempts}: {source}")]
    Permanent {
        attempts: u32,
        #[source]
        source: E,
    },
    #[error("gave up after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
    #[error("deadline of {deadline:?} exceeded after {attempts} attempt(s)")]
    DeadlineExceeded {
        attempts: u32,
        deadline: Duration,
        #[source]
        last: Option<E>,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Number of times the operation was started
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }
}

/// Runs remote calls under a [`RetryPolicy`]. The only place backoff lives.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute `operation` until it succeeds, fails permanently, runs out of
    /// attempts or passes the deadline.
    ///
    /// # Errors
    /// Returns the last underlying error wrapped with the attempt count.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::error::Error + 'static,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        // A deadline too far out to represent is no deadline at all
        let deadline = self
            .policy
            .deadline
            .and_then(|d| Instant::now().checked_add(d).map(|at| (d, at)));
        let mut attempt = 0;
        let mut last_error: Option<E> = None;

        loop {
            attempt += 1;

            let outcome = match deadline {
                Some((budget, at)) => match tokio::time::timeout_at(at, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(
                            "Deadline of {:?} hit during attempt {} of {}",
                            budget,
                            attempt,
                            max_attempts
                        );
                        return Err(RetryError::DeadlineExceeded {
                            attempts: attempt,
                            deadline: budget,
                            last: last_error.take(),
                        });
                    }
                },
                None => operation().await,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("Call succeeded after {} attempts", attempt);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if error.retry_decision() == RetryDecision::NoRetry {
                tracing::debug!("Non-retryable error on attempt {}: {}", attempt, error);
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                tracing::error!("All {} attempts exhausted: {}", max_attempts, error);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.jittered_delay(attempt);

            if let Some((budget, at)) = deadline {
                let wakes_at = Instant::now().checked_add(delay);
                if wakes_at.map_or(true, |wake| wake >= at) {
                    tracing::warn!(
                        "Backoff of {:?} would pass the {:?} deadline, giving up after {} attempts",
                        delay,
                        budget,
                        attempt
                    );
                    return Err(RetryError::DeadlineExceeded {
                        attempts: attempt,
                        deadline: budget,
                        last: Some(error),
                    });
                }
            }

            tracing::warn!(
                "Retryable error on attempt {} of {}, retrying in {:?}: {}",
                attempt,
                max_attempts,
                delay,
                error
            );
            last_error = Some(error);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    enum FakeError {
        #[error("flaky")]
        Transient,
        #[error("bad input")]
        Permanent,
    }

    impl Retryable for FakeError {
        fn retry_decision(&self) -> RetryDecision {
            match self {
                FakeError::Transient => RetryDecision::Retry,
                FakeError::Permanent => RetryDecision::NoRetry,
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(100), 2.0)
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.deadline, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_delay_calculation() {
        let policy = policy(5);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = policy(10).with_max_delay(Duration::from_millis(1000));

        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = policy(3).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let delay = policy.jittered_delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_retryable_status_codes() {
        assert_eq!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR), RetryDecision::Retry);
        assert_eq!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE), RetryDecision::Retry);
        assert_eq!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS), RetryDecision::Retry);
        assert_eq!(is_retryable_status(StatusCode::REQUEST_TIMEOUT), RetryDecision::Retry);

        assert_eq!(is_retryable_status(StatusCode::BAD_REQUEST), RetryDecision::NoRetry);
        assert_eq!(is_retryable_status(StatusCode::UNAUTHORIZED), RetryDecision::NoRetry);
        assert_eq!(is_retryable_status(StatusCode::NOT_FOUND), RetryDecision::NoRetry);
        assert_eq!(is_retryable_status(StatusCode::OK), RetryDecision::NoRetry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_makes_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(4));

        let counter = calls.clone();
        let result: Result<(), _> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::Transient)
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(source, FakeError::Transient));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(5));

        let counter = calls.clone();
        let result: Result<(), _> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::Permanent)
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(5));
        let started = Instant::now();

        let counter = calls.clone();
        let value = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FakeError::Transient)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms after the first failure, 200ms after the second
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(
            RetryPolicy::new(10, Duration::from_secs(1), 2.0)
                .with_max_delay(Duration::from_secs(60))
                .with_deadline(Some(Duration::from_millis(2500))),
        );

        let counter = calls.clone();
        let result: Result<(), _> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::Transient)
                }
            })
            .await;

        // Sleeps 1s then 2s; the second sleep would cross 2.5s
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(RetryError::DeadlineExceeded { attempts, last, .. }) => {
                assert_eq!(attempts, 2);
                assert!(last.is_some());
            }
            other => panic!("expected deadline, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_hanging_attempt() {
        let executor = RetryExecutor::new(
            policy(3).with_deadline(Some(Duration::from_secs(1))),
        );

        let result: Result<(), RetryError<FakeError>> = executor
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        match result {
            Err(e @ RetryError::DeadlineExceeded { .. }) => assert_eq!(e.attempts(), 1),
            other => panic!("expected deadline, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_later_attempt_keeps_previous_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(
            policy(5).with_deadline(Some(Duration::from_secs(2))),
        );

        let counter = calls.clone();
        let result: Result<(), _> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(FakeError::Transient);
                    }
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(RetryError::DeadlineExceeded { attempts, last, .. }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(last, Some(FakeError::Transient)));
            }
            other => panic!("expected deadline, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_means_no_deadline() {
        let executor = RetryExecutor::new(
            RetryPolicy::default().with_deadline(Some(Duration::from_secs(i64::MAX as u64))),
        );

        let value = executor
            .execute(|| async { Ok::<_, FakeError>(1) })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_backoff_gives_up_at_deadline() {
        let executor = RetryExecutor::new(
            RetryPolicy::new(3, Duration::from_secs(u64::MAX / 2), 2.0)
                .with_max_delay(Duration::from_secs(u64::MAX / 2))
                .with_deadline(Some(Duration::from_secs(30))),
        );

        let result: Result<(), _> = executor
            .execute(|| async { Err(FakeError::Transient) })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::DeadlineExceeded { attempts: 1, last: Some(_), .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_attempts_still_tries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(0));

        let counter = calls.clone();
        let _: Result<(), _> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::Transient)
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
