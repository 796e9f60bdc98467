//! Scoped handle acquisition
//!
//! Every logical operation gets its own handle from the connector, and the
//! handle is released on every exit path, unwinding included.

use querypipe_core::{
    error::Result,
    observe,
    traits::{Connector, RowCursor, StoreHandle},
    Query, Row,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle open/close counters
#[derive(Debug, Default)]
pub struct ScopeMetrics {
    opened: AtomicU64,
    closed: AtomicU64,
}

impl ScopeMetrics {
    /// Returns the sequence number of the opened handle
    fn record_open(&self) -> u64 {
        observe::record_handle_open();
        self.opened.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_close(&self) {
        observe::record_handle_close();
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ScopeStats {
        ScopeStats {
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of handle accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeStats {
    pub opened: u64,
    pub closed: u64,
}

impl ScopeStats {
    /// Handles currently held by running operations
    pub fn in_use(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

/// Counts the handle as released when dropped, whichever way the scope ends
struct Release {
    metrics: Arc<ScopeMetrics>,
    handle_id: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.metrics.record_close();
        debug!(handle_id = self.handle_id, "Handle released");
    }
}

/// Opens one handle per operation and guarantees its release
///
/// # Example
///
/// ```no_run
/// use querypipe::prelude::*;
///
/// # fn main() -> Result<()> {
/// let scope = ConnectionScope::new(SqliteConnector::new(StoreConfig::new("./users.db")));
/// let rows = scope.run(|handle| handle.query(&Query::new("SELECT * FROM users")))?;
/// assert_eq!(scope.stats().in_use(), 0);
/// # Ok(())
/// # }
/// ```
pub struct ConnectionScope<C: Connector> {
    connector: Arc<C>,
    metrics: Arc<ScopeMetrics>,
}

impl<C: Connector> Clone for ConnectionScope<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: Connector> ConnectionScope<C> {
    pub fn new(connector: C) -> Self {
        Self::from_arc(Arc::new(connector))
    }

    pub fn from_arc(connector: Arc<C>) -> Self {
        Self {
            connector,
            metrics: Arc::new(ScopeMetrics::default()),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn stats(&self) -> ScopeStats {
        self.metrics.snapshot()
    }

    fn open(&self) -> Result<(C::Handle, Release)> {
        // Open failures go back to the caller untouched
        let handle = self.connector.open()?;
        let handle_id = self.metrics.record_open();
        debug!(handle_id, store = self.connector.name(), "Handle opened");
        Ok((
            handle,
            Release {
                metrics: self.metrics.clone(),
                handle_id,
            },
        ))
    }

    /// Run `operation` with a freshly opened handle, then close it.
    ///
    /// The operation's own error wins over a failure to close; a close
    /// failure after a successful operation is returned.
    pub fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&mut C::Handle) -> Result<T>,
    {
        let (mut handle, release) = self.open()?;
        let result = operation(&mut handle);
        let closed = handle.close();
        drop(release);

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Handle close failed after operation error");
                Err(e)
            }
        }
    }

    /// Turn a handle-taking operation into one that manages its own handle.
    pub fn wrap<T, F>(&self, operation: F) -> impl Fn() -> Result<T>
    where
        F: Fn(&mut C::Handle) -> Result<T>,
    {
        let scope = self.clone();
        move || scope.run(&operation)
    }

    /// Open a handle, run `query`, fetch every row and close the handle.
    pub fn execute_query(&self, query: &Query) -> Result<Vec<Row>> {
        self.run(|handle| handle.query(query))
    }

    /// Open a handle, run a statement and close the handle.
    pub fn execute(&self, query: &Query) -> Result<usize> {
        self.run(|handle| handle.execute(query))
    }

    /// Open a cursor whose handle stays open until the cursor is closed or
    /// dropped.
    pub fn open_cursor(&self, query: &Query) -> Result<ScopedCursor<C>> {
        let (handle, release) = self.open()?;
        let cursor = handle.open_cursor(query)?;
        Ok(ScopedCursor {
            inner: cursor,
            release,
        })
    }
}

/// Cursor owned by a [`ConnectionScope`]
///
/// Counted as released when it is closed or dropped.
pub struct ScopedCursor<C: Connector> {
    inner: <C::Handle as StoreHandle>::Cursor,
    release: Release,
}

impl<C: Connector> ScopedCursor<C> {
    pub fn handle_id(&self) -> u64 {
        self.release.handle_id
    }
}

impl<C: Connector> RowCursor for ScopedCursor<C> {
    fn fetch(&mut self, n: usize) -> Result<Vec<Row>> {
        self.inner.fetch(n)
    }

    fn close(self) -> Result<()> {
        self.inner.close()
    }
}
