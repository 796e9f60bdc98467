//! Concurrent fan-out of independent reads
//!
//! Each branch runs on the blocking thread pool (store calls block) under a
//! shared deadline. Joins are fail-fast: the first error is returned and
//! the results of other branches are discarded. Branches still running at
//! that point finish in the background and release their own handles.

use futures::future::try_join_all;
use querypipe_core::{
    error::{PipelineError, Result},
    observe, FanOutConfig,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fan-out executor
///
/// # Example
///
/// ```no_run
/// use querypipe::prelude::*;
///
/// # async fn example(scope: ConnectionScope<SqliteConnector>) -> Result<()> {
/// let fan_out = FanOut::default();
/// let (a, b) = (scope.clone(), scope.clone());
/// let (all, older) = fan_out
///     .join2(
///         move || a.execute_query(&Query::new("SELECT * FROM users")),
///         move || b.execute_query(&Query::new("SELECT * FROM users WHERE age > ?").bind(40)),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    timeout: Duration,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(&FanOutConfig::default())
    }
}

impl FanOut {
    pub fn new(config: &FanOutConfig) -> Self {
        Self {
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn branch<T, F>(&self, index: usize, operation: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(operation)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => Err(PipelineError::Cancelled(format!(
                "fan-out branch {index} panicked"
            ))),
            Ok(Err(join_err)) => Err(PipelineError::Cancelled(format!(
                "fan-out branch {index}: {join_err}"
            ))),
            Err(_) => Err(PipelineError::Timeout(format!(
                "fan-out branch {index} exceeded {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn finish<T>(&self, branches: usize, started: Instant, result: &Result<T>) {
        let elapsed = started.elapsed();
        observe::record_fan_out(branches, elapsed, result.is_ok());
        match result {
            Ok(_) => debug!(
                branches,
                elapsed_ms = elapsed.as_millis() as u64,
                "Fan-out joined"
            ),
            Err(e) => warn!(branches, error = %e, "Fan-out failed"),
        }
    }

    /// Run two operations concurrently; results keep argument order.
    pub async fn join2<A, B, FA, FB>(&self, a: FA, b: FB) -> Result<(A, B)>
    where
        FA: FnOnce() -> Result<A> + Send + 'static,
        FB: FnOnce() -> Result<B> + Send + 'static,
        A: Send + 'static,
        B: Send + 'static,
    {
        let started = Instant::now();
        let result = tokio::try_join!(self.branch(0, a), self.branch(1, b));
        self.finish(2, started, &result);
        result
    }

    /// Run three operations concurrently; results keep argument order.
    pub async fn join3<A, B, C, FA, FB, FC>(&self, a: FA, b: FB, c: FC) -> Result<(A, B, C)>
    where
        FA: FnOnce() -> Result<A> + Send + 'static,
        FB: FnOnce() -> Result<B> + Send + 'static,
        FC: FnOnce() -> Result<C> + Send + 'static,
        A: Send + 'static,
        B: Send + 'static,
        C: Send + 'static,
    {
        let started = Instant::now();
        let result = tokio::try_join!(self.branch(0, a), self.branch(1, b), self.branch(2, c));
        self.finish(3, started, &result);
        result
    }

    /// Run any number of operations concurrently; results keep input order.
    pub async fn join_all<T, F>(&self, operations: Vec<F>) -> Result<Vec<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let branches = operations.len();
        let result = try_join_all(
            operations
                .into_iter()
                .enumerate()
                .map(|(index, operation)| self.branch(index, operation)),
        )
        .await;
        self.finish(branches, started, &result);
        result
    }
}
