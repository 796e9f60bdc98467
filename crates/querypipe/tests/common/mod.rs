#![allow(dead_code)]

use querypipe::{
    Connector, PipelineConfig, PipelineError, Query, Result, Row, SqliteConnector, SqliteCursor,
    SqliteHandle, StoreConfig, StoreHandle,
};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const USERS: [(&str, i64); 4] = [("Alice", 30), ("Bob", 22), ("Charlie", 45), ("Diana", 50)];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh database with a `users` table holding the first `n` fixture rows
pub fn users_db(n: usize) -> (TempDir, StoreConfig) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path().join("users.db"));

    let mut handle = SqliteConnector::new(config.clone()).open().unwrap();
    handle
        .execute(&Query::new(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT UNIQUE NOT NULL, age INTEGER NOT NULL)",
        ))
        .unwrap();
    for (name, age) in USERS.iter().take(n) {
        handle
            .execute(&Query::new("INSERT INTO users (name, age) VALUES (?, ?)").bind(*name).bind(*age))
            .unwrap();
    }
    handle.close().unwrap();

    (dir, config)
}

/// Quiet, fast config for tests
pub fn test_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_retry(querypipe::RetryConfig::new(3, std::time::Duration::ZERO))
        .with_log_queries(false)
}

/// Connector that counts store round trips and can inject transient failures
/// or a stalled round trip
pub struct CountingConnector {
    inner: SqliteConnector,
    queries: Arc<AtomicUsize>,
    fail_next: Arc<AtomicU32>,
    stall_next_ms: Arc<AtomicU64>,
}

impl CountingConnector {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: SqliteConnector::new(config),
            queries: Arc::new(AtomicUsize::new(0)),
            fail_next: Arc::new(AtomicU32::new(0)),
            stall_next_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make the next `n` queries fail with a transient error
    pub fn fail_next(self, n: u32) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    /// Make the next query block for `stall` before reaching the store
    pub fn stall_next(self, stall: Duration) -> Self {
        self.stall_next_ms.store(stall.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn queries(&self) -> Arc<AtomicUsize> {
        self.queries.clone()
    }
}

pub struct CountingHandle {
    inner: SqliteHandle,
    queries: Arc<AtomicUsize>,
    fail_next: Arc<AtomicU32>,
    stall_next_ms: Arc<AtomicU64>,
}

impl CountingHandle {
    fn round_trip(&self) -> Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let stall = self.stall_next_ms.swap(0, Ordering::SeqCst);
        if stall > 0 {
            std::thread::sleep(Duration::from_millis(stall));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PipelineError::transient("SQLITE_BUSY", "database is locked"));
        }
        Ok(())
    }
}

impl Connector for CountingConnector {
    type Handle = CountingHandle;

    fn open(&self) -> Result<CountingHandle> {
        Ok(CountingHandle {
            inner: self.inner.open()?,
            queries: self.queries.clone(),
            fail_next: self.fail_next.clone(),
            stall_next_ms: self.stall_next_ms.clone(),
        })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

impl StoreHandle for CountingHandle {
    type Cursor = SqliteCursor;

    fn execute(&mut self, query: &Query) -> Result<usize> {
        self.round_trip()?;
        self.inner.execute(query)
    }

    fn query(&mut self, query: &Query) -> Result<Vec<Row>> {
        self.round_trip()?;
        self.inner.query(query)
    }

    fn open_cursor(self, query: &Query) -> Result<SqliteCursor> {
        self.round_trip()?;
        self.inner.open_cursor(query)
    }

    fn begin(&mut self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn close(self) -> Result<()> {
        self.inner.close()
    }
}
