//! Bounded retry of transient failures
//!
//! Only errors classified as transient (`PipelineError::is_transient`) are
//! retried. Everything else propagates on the first attempt, and the last
//! transient error propagates unchanged once attempts run out.

use querypipe_core::{error::Result, observe, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Fixed-delay retry policy
///
/// Total attempts never exceed `max_attempts`, and the time spent sleeping
/// never exceeds `(max_attempts - 1) * delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// A policy making at most `max_attempts` attempts (at least one).
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.delay())
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a failure on `attempt` should be followed by another attempt
    fn should_retry(&self, attempt: u32, err: &querypipe_core::PipelineError) -> bool {
        if !err.is_transient() {
            return false;
        }
        if attempt >= self.max_attempts {
            error!(
                attempts = attempt,
                error = %err,
                "Retries exhausted"
            );
            return false;
        }
        warn!(
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = self.delay.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );
        observe::record_retry(attempt);
        true
    }

    /// Run `operation`, retrying transient failures on the current thread.
    pub fn run<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if self.should_retry(attempt, &e) => {
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Async variant of [`run`](Self::run); sleeps on the tokio timer.
    pub async fn run_async<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if self.should_retry(attempt, &e) => {
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Turn `operation` into one that retries itself.
    pub fn wrap<T, F>(&self, operation: F) -> impl Fn() -> Result<T>
    where
        F: Fn() -> Result<T>,
    {
        let policy = *self;
        move || policy.run(&operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querypipe_core::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn busy() -> PipelineError {
        PipelineError::transient("SQLITE_BUSY", "database is locked")
    }

    #[test]
    fn test_succeeds_on_third_attempt() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let attempts = AtomicU32::new(0);

        let result = policy.run(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(busy())
            } else {
                Ok(n)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let attempts = AtomicU32::new(0);

        let err = policy
            .run(|| -> Result<()> {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                Err(PipelineError::transient("SQLITE_BUSY", format!("attempt {n}")))
            })
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match err {
            PipelineError::Transient { message, .. } => assert_eq!(message, "attempt 3"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let attempts = AtomicU32::new(0);

        let err = policy
            .run(|| -> Result<()> {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Integrity("UNIQUE constraint failed".into()))
            })
            .unwrap_err();

        assert!(err.is_integrity());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_error_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let attempts = AtomicU32::new(0);
        let _ = policy.run(|| -> Result<()> {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::Connection("unable to open database file".into()))
        });
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_bounds_latency() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let started = Instant::now();
        let _ = policy.run(|| -> Result<()> { Err(busy()) });
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.run(|| Ok(1)).unwrap(), 1);
    }

    #[test]
    fn test_wrap() {
        let attempts = AtomicU32::new(0);
        let op = RetryPolicy::new(2, Duration::ZERO).wrap(|| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(busy())
            } else {
                Ok("done")
            }
        });
        assert_eq!(op().unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_async_retries() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result = policy
            .run_async(move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy())
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
