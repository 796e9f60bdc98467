//! The composed pipeline
//!
//! Wrappers are stacked in one fixed order, outermost first:
//!
//! ```text
//! read_cached:         cache -> retry -> scope -> query
//! write_transactional: retry -> scope -> transaction -> unit of work
//! ```
//!
//! A cache hit never touches the store, every physical attempt gets its own
//! handle, and a transaction always runs on the handle its scope opened.

use querypipe_core::{
    error::Result,
    traits::Connector,
    PipelineConfig, Query, Row,
};
use std::sync::Arc;
use tracing::info;

use crate::cache::QueryCache;
use crate::fanout::FanOut;
use crate::query_log::log_query;
use crate::retry::RetryPolicy;
use crate::scope::{ConnectionScope, ScopedCursor};
use crate::stream::{check_size, BatchStream, Paginator, ScalarStream};
use crate::transaction;

/// Entry point for callers
///
/// Cheap to clone; clones share the connector, cache and handle accounting.
///
/// # Example
///
/// ```no_run
/// use querypipe::prelude::*;
///
/// # fn main() -> Result<()> {
/// let pipeline = Pipeline::new(
///     SqliteConnector::new(StoreConfig::new("./users.db")),
///     PipelineConfig::default(),
/// )?;
///
/// let users = pipeline.read_cached(&Query::new("SELECT * FROM users"))?;
///
/// pipeline.write_transactional(|txn| {
///     txn.execute(&Query::new("UPDATE users SET age = age + 1 WHERE name = ?").bind("Bob"))
/// })?;
///
/// for page in pipeline.paginate(&Query::new("SELECT * FROM users"), 100)? {
///     println!("{} rows", page?.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<C: Connector> {
    scope: ConnectionScope<C>,
    cache: Arc<QueryCache<Vec<Row>>>,
    retry: RetryPolicy,
    fan_out: FanOut,
    config: Arc<PipelineConfig>,
}

impl<C: Connector> Clone for Pipeline<C> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            cache: self.cache.clone(),
            retry: self.retry,
            fan_out: self.fan_out,
            config: self.config.clone(),
        }
    }
}

impl<C: Connector> Pipeline<C> {
    pub fn new(connector: C, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        info!(
            store = connector.name(),
            max_attempts = config.retry.max_attempts,
            cache_enabled = config.cache.enabled,
            "Opening query pipeline"
        );

        Ok(Self {
            scope: ConnectionScope::new(connector),
            cache: Arc::new(QueryCache::new(config.cache.clone())),
            retry: RetryPolicy::from_config(&config.retry),
            fan_out: FanOut::new(&config.fan_out),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache<Vec<Row>> {
        &self.cache
    }

    pub fn scope(&self) -> &ConnectionScope<C> {
        &self.scope
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    fn log(&self, query: &Query) {
        if self.config.log_queries {
            log_query(query);
        }
    }

    /// Run `query` and return every row, retrying transient failures with a
    /// fresh handle per attempt.
    pub fn read(&self, query: &Query) -> Result<Vec<Row>> {
        self.log(query);
        self.retry.run(|| self.scope.execute_query(query))
    }

    /// Like [`read`](Self::read), but served from the cache after the first
    /// successful call for the same fingerprint.
    pub fn read_cached(&self, query: &Query) -> Result<Vec<Row>> {
        self.cache.get_or_compute(query, |q| self.read(q))
    }

    /// Run `work` in a transaction; every retried attempt gets its own
    /// handle and its own transaction.
    pub fn write_transactional<T, F>(&self, work: F) -> Result<T>
    where
        F: Fn(&mut C::Handle) -> Result<T>,
    {
        self.retry
            .run(|| self.scope.run(|handle| transaction::run(handle, &work)))
    }

    /// Stream the rows of `query` in batches of `batch_size`.
    pub fn stream_batches(
        &self,
        query: &Query,
        batch_size: usize,
    ) -> Result<BatchStream<ScopedCursor<C>>> {
        check_size(batch_size, "batch_size")?;
        self.log(query);
        let cursor = self.retry.run(|| self.scope.open_cursor(query))?;
        BatchStream::new(cursor, batch_size)
    }

    /// [`stream_batches`](Self::stream_batches) with the configured batch size.
    pub fn batches(&self, query: &Query) -> Result<BatchStream<ScopedCursor<C>>> {
        self.stream_batches(query, self.config.stream.batch_size)
    }

    /// Page through `query` with `LIMIT`/`OFFSET`.
    pub fn paginate(&self, query: &Query, page_size: u64) -> Result<Paginator<C>> {
        self.log(query);
        Ok(Paginator::new(self.scope.clone(), query.clone(), page_size)?.with_retry(self.retry))
    }

    /// [`paginate`](Self::paginate) with the configured page size.
    pub fn pages(&self, query: &Query) -> Result<Paginator<C>> {
        self.paginate(query, self.config.stream.page_size)
    }

    /// Stream one column of `query`, one value per row.
    pub fn stream_scalars(
        &self,
        query: &Query,
        column: usize,
    ) -> Result<ScalarStream<ScopedCursor<C>>> {
        let chunk_size = check_size(self.config.stream.scalar_chunk_size, "chunk_size")?;
        self.log(query);
        let cursor = self.retry.run(|| self.scope.open_cursor(query))?;
        ScalarStream::new(cursor, column, chunk_size)
    }
}

impl<C: Connector + 'static> Pipeline<C> {
    /// Read two queries concurrently; results keep argument order.
    pub async fn fan_out(&self, first: Query, second: Query) -> Result<(Vec<Row>, Vec<Row>)> {
        let (a, b) = (self.clone(), self.clone());
        self.fan_out
            .join2(move || a.read(&first), move || b.read(&second))
            .await
    }

    /// Read any number of queries concurrently; results keep input order.
    pub async fn fan_out_all(&self, queries: Vec<Query>) -> Result<Vec<Vec<Row>>> {
        let operations: Vec<_> = queries
            .into_iter()
            .map(|query| {
                let pipeline = self.clone();
                move || pipeline.read(&query)
            })
            .collect();
        self.fan_out.join_all(operations).await
    }
}
