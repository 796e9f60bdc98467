//! Stripe-based key locks
//!
//! Gives callers mutual exclusion per key without keeping one mutex per key
//! alive forever. Keys are hashed to a fixed set of stripes; two keys that
//! share a stripe simply serialize.

use crate::error::{PipelineError, Result};
use parking_lot::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use xxhash_rust::xxh3::xxh3_64;

/// Default lock acquisition timeout (30 seconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Lock manager used to make "compute at most once per key" hold under
/// concurrent callers.
///
/// Acquisition is bounded by a timeout instead of blocking indefinitely; a
/// caller that cannot get its stripe in time receives
/// [`PipelineError::LockTimeout`].
///
/// # Example
///
/// ```
/// use querypipe_core::LockManager;
/// use std::time::Duration;
///
/// let lm = LockManager::new(64, Duration::from_secs(1));
/// let _guard = lm.lock(b"fingerprint").unwrap();
/// ```
pub struct LockManager {
    stripes: Vec<Mutex<()>>,
    default_timeout: Duration,
}

impl LockManager {
    /// Create a lock manager with `num_stripes` stripes.
    ///
    /// # Panics
    ///
    /// Panics if `num_stripes` is 0.
    pub fn new(num_stripes: usize, default_timeout: Duration) -> Self {
        assert!(num_stripes > 0, "num_stripes must be positive");
        let stripes = (0..num_stripes).map(|_| Mutex::new(())).collect();

        Self {
            stripes,
            default_timeout,
        }
    }

    /// Create a lock manager with the default timeout
    pub fn with_stripes(num_stripes: usize) -> Self {
        Self::new(num_stripes, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }

    /// Index of the stripe that owns `key`.
    pub fn stripe_index(&self, key: &[u8]) -> usize {
        (xxh3_64(key) as usize) % self.stripes.len()
    }

    /// Lock the stripe owning `key` with the default timeout.
    pub fn lock(&self, key: &[u8]) -> Result<MutexGuard<'_, ()>> {
        self.lock_with_timeout(key, self.default_timeout)
    }

    /// Lock the stripe owning `key`, giving up after `timeout`.
    pub fn lock_with_timeout(&self, key: &[u8], timeout: Duration) -> Result<MutexGuard<'_, ()>> {
        self.lock_stripe(self.stripe_index(key), timeout)
    }

    /// Lock a stripe by index, giving up after `timeout`.
    ///
    /// # Panics
    ///
    /// Panics if `stripe` is not below [`num_stripes`](Self::num_stripes).
    pub fn lock_stripe(&self, stripe: usize, timeout: Duration) -> Result<MutexGuard<'_, ()>> {
        let started = Instant::now();
        let guard = self.stripes[stripe]
            .try_lock_for(timeout)
            .ok_or(PipelineError::LockTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })?;
        crate::observe::record_lock_wait(started.elapsed());
        Ok(guard)
    }

    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stripe_is_stable() {
        let lm = LockManager::with_stripes(256);
        let idx = lm.stripe_index(b"key1");
        assert!(idx < 256);
        assert_eq!(idx, lm.stripe_index(b"key1"));
    }

    #[test]
    fn test_timeout_works() {
        let lm = Arc::new(LockManager::new(1, Duration::from_millis(50)));
        let _guard = lm.lock(b"any_key").unwrap();

        let lm2 = lm.clone();
        let timed_out = thread::spawn(move || {
            matches!(
                lm2.lock(b"another_key"),
                Err(PipelineError::LockTimeout { timeout_ms: 50 })
            )
        })
        .join()
        .unwrap();

        assert!(timed_out, "Should have timed out");
    }

    #[test]
    fn test_same_key_is_mutually_exclusive() {
        let lm = Arc::new(LockManager::with_stripes(16));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lm = lm.clone();
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _guard = lm.lock(b"shared").unwrap();
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
