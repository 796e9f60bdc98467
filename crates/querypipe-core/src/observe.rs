//! Optional metrics instrumentation.
//!
//! When the `observe` feature is enabled, pipeline operations emit counters,
//! histograms, and gauges via the [`metrics`] crate. A downstream
//! application must install a metrics recorder (e.g. `metrics-exporter-prometheus`)
//! to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a query cache hit or miss.
///
/// - `querypipe.cache.lookups_total` – counter with `result` label (`hit` / `miss` / `bypass`)
#[inline]
pub fn record_cache_lookup(result: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("querypipe.cache.lookups_total", "result" => result).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = result;
    }
}

/// Set the current cache size gauge.
///
/// - `querypipe.cache.size` – gauge
#[inline]
pub fn set_cache_size(size: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("querypipe.cache.size").set(size as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = size;
    }
}

/// Record one retried attempt.
///
/// - `querypipe.retry.attempts_total` – counter
/// - `querypipe.retry.attempt` – histogram of the attempt number that failed
#[inline]
pub fn record_retry(attempt: u32) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("querypipe.retry.attempts_total").increment(1);
        metrics::histogram!("querypipe.retry.attempt").record(attempt as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = attempt;
    }
}

/// Record a finished transaction (counter + latency histogram).
///
/// - `querypipe.transaction.total` – counter with `outcome` label (`commit` / `rollback`)
/// - `querypipe.transaction.duration_seconds` – histogram
#[inline]
pub fn record_transaction(duration: std::time::Duration, committed: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if committed { "commit" } else { "rollback" };
        metrics::counter!("querypipe.transaction.total", "outcome" => outcome).increment(1);
        metrics::histogram!("querypipe.transaction.duration_seconds")
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, committed);
    }
}

/// Record a handle being opened.
///
/// - `querypipe.handle.opened_total` – counter
#[inline]
pub fn record_handle_open() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("querypipe.handle.opened_total").increment(1);
    }
}

/// Record a handle being released.
///
/// - `querypipe.handle.closed_total` – counter
#[inline]
pub fn record_handle_close() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("querypipe.handle.closed_total").increment(1);
    }
}

/// Record a fan-out join.
///
/// - `querypipe.fan_out.total` – counter with `outcome` label
/// - `querypipe.fan_out.duration_seconds` – histogram
/// - `querypipe.fan_out.branches` – histogram
#[inline]
pub fn record_fan_out(branches: usize, duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("querypipe.fan_out.total", "outcome" => outcome).increment(1);
        metrics::histogram!("querypipe.fan_out.duration_seconds").record(duration.as_secs_f64());
        metrics::histogram!("querypipe.fan_out.branches").record(branches as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (branches, duration, success);
    }
}

/// Record a lock acquisition wait time.
///
/// - `querypipe.lock.wait_duration_seconds` – histogram
#[inline]
pub fn record_lock_wait(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("querypipe.lock.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}
