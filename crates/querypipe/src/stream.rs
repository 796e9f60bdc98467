//! Lazy, memory-bounded iteration over query results
//!
//! - [`BatchStream`]: fixed-size batches from one open cursor
//! - [`Paginator`]: `LIMIT`/`OFFSET` pages, one short-lived handle per page
//! - [`ScalarStream`]: one column value per row, fetched in chunks
//!
//! All three fetch only when polled, release their handle once exhausted,
//! on error, or when dropped, and are fused afterwards.

use querypipe_core::{
    error::{PipelineError, Result},
    traits::{Connector, RowCursor},
    PageCursor, Query, Row, Value,
};
use std::collections::VecDeque;
use std::iter::FusedIterator;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use crate::scope::ConnectionScope;

fn release<R: RowCursor>(cursor: &mut Option<R>) -> Result<()> {
    match cursor.take() {
        Some(cursor) => cursor.close(),
        None => Ok(()),
    }
}

/// Reject a zero batch or chunk size before any handle is opened.
pub(crate) fn check_size(size: usize, what: &str) -> Result<usize> {
    if size == 0 {
        return Err(PipelineError::Config(format!("{what} must be positive")));
    }
    Ok(size)
}

/// Yields rows in batches of at most `batch_size`
pub struct BatchStream<R: RowCursor> {
    cursor: Option<R>,
    batch_size: usize,
}

impl<R: RowCursor> BatchStream<R> {
    pub fn new(cursor: R, batch_size: usize) -> Result<Self> {
        Ok(Self {
            batch_size: check_size(batch_size, "batch_size")?,
            cursor: Some(cursor),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether the underlying handle has been released
    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }
}

impl<R: RowCursor> Iterator for BatchStream<R> {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        match cursor.fetch(self.batch_size) {
            Ok(batch) if !batch.is_empty() => Some(Ok(batch)),
            Ok(_) => {
                debug!("Batch stream exhausted");
                release(&mut self.cursor).err().map(Err)
            }
            Err(e) => {
                if let Err(close_err) = release(&mut self.cursor) {
                    warn!(error = %close_err, "Closing cursor after fetch error failed");
                }
                Some(Err(e))
            }
        }
    }
}

impl<R: RowCursor> FusedIterator for BatchStream<R> {}

/// Yields `LIMIT`/`OFFSET` pages of a query
///
/// Every page is fetched in its own connection scope (retried when a policy
/// is set), so no handle is held between pages. Iteration stops at the
/// first empty page, which is not yielded.
pub struct Paginator<C: Connector> {
    scope: ConnectionScope<C>,
    retry: RetryPolicy,
    query: Query,
    cursor: PageCursor,
    done: bool,
}

impl<C: Connector> Paginator<C> {
    pub fn new(scope: ConnectionScope<C>, query: Query, page_size: u64) -> Result<Self> {
        Ok(Self {
            scope,
            retry: RetryPolicy::none(),
            query,
            cursor: PageCursor::new(page_size)?,
            done: false,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start from `offset` instead of the first row
    pub fn starting_at(mut self, offset: u64) -> Result<Self> {
        self.cursor = PageCursor::starting_at(offset, self.cursor.page_size())?;
        Ok(self)
    }

    /// Offset of the next page to fetch
    pub fn offset(&self) -> u64 {
        self.cursor.offset()
    }

    pub fn page_size(&self) -> u64 {
        self.cursor.page_size()
    }
}

impl<C: Connector> Iterator for Paginator<C> {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let paged = self.query.paged(&self.cursor);
        let scope = &self.scope;
        match self.retry.run(|| scope.execute_query(&paged)) {
            Ok(page) if page.is_empty() => {
                debug!(offset = self.cursor.offset(), "Pagination finished");
                self.done = true;
                None
            }
            Ok(page) => {
                if let Err(e) = self.cursor.advance() {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(page))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<C: Connector> FusedIterator for Paginator<C> {}

/// Yields one column value per row, fetching `chunk_size` rows at a time
pub struct ScalarStream<R: RowCursor> {
    cursor: Option<R>,
    column: usize,
    chunk_size: usize,
    buffer: VecDeque<Value>,
}

impl<R: RowCursor> ScalarStream<R> {
    pub fn new(cursor: R, column: usize, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            chunk_size: check_size(chunk_size, "chunk_size")?,
            cursor: Some(cursor),
            column,
            buffer: VecDeque::new(),
        })
    }

    fn refill(&mut self) -> Option<Result<()>> {
        let cursor = self.cursor.as_mut()?;
        let rows = match cursor.fetch(self.chunk_size) {
            Ok(rows) if rows.is_empty() => return release(&mut self.cursor).err().map(Err),
            Ok(rows) => rows,
            Err(e) => return Some(Err(self.fail(e))),
        };

        for row in rows {
            let width = row.len();
            match row.into_values().into_iter().nth(self.column) {
                Some(value) => self.buffer.push_back(value),
                None => {
                    let err = PipelineError::InvalidState(format!(
                        "column {} out of range for row of {} columns",
                        self.column, width
                    ));
                    return Some(Err(self.fail(err)));
                }
            }
        }
        Some(Ok(()))
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        self.buffer.clear();
        if let Err(close_err) = release(&mut self.cursor) {
            warn!(error = %close_err, "Closing cursor after scalar stream error failed");
        }
        err
    }
}

impl<R: RowCursor> Iterator for ScalarStream<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.buffer.pop_front() {
                return Some(Ok(value));
            }
            match self.refill()? {
                Ok(()) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<R: RowCursor> FusedIterator for ScalarStream<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use querypipe_core::{row, StoreConfig, StoreHandle};
    use querypipe_sqlite::SqliteConnector;
    use tempfile::tempdir;

    fn fixture(rows: i64) -> (tempfile::TempDir, ConnectionScope<SqliteConnector>) {
        let dir = tempdir().unwrap();
        let scope = ConnectionScope::new(SqliteConnector::new(StoreConfig::new(
            dir.path().join("stream.db"),
        )));
        scope
            .execute(&Query::new("CREATE TABLE nums (n INTEGER NOT NULL)"))
            .unwrap();
        scope
            .run(|handle| {
                crate::transaction::run(handle, |txn| {
                    for n in 0..rows {
                        txn.execute(&Query::new("INSERT INTO nums (n) VALUES (?)").bind(n))?;
                    }
                    Ok(())
                })
            })
            .unwrap();
        (dir, scope)
    }

    #[test]
    fn test_batches_cover_every_row_in_order() {
        let (_dir, scope) = fixture(12);
        let cursor = scope
            .open_cursor(&Query::new("SELECT n FROM nums ORDER BY n"))
            .unwrap();
        let batches: Vec<Vec<Row>> = BatchStream::new(cursor, 5)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![5, 5, 2]
        );
        let flat: Vec<Row> = batches.into_iter().flatten().collect();
        assert_eq!(flat, (0..12).map(|n| row![n]).collect::<Vec<_>>());
        assert_eq!(scope.stats().in_use(), 0);
    }

    #[test]
    fn test_batch_stream_is_fused() {
        let (_dir, scope) = fixture(0);
        let cursor = scope.open_cursor(&Query::new("SELECT n FROM nums")).unwrap();
        let mut stream = BatchStream::new(cursor, 5).unwrap();
        assert!(stream.next().is_none());
        assert!(stream.is_finished());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let (_dir, scope) = fixture(0);
        let cursor = scope.open_cursor(&Query::new("SELECT n FROM nums")).unwrap();
        assert!(matches!(
            BatchStream::new(cursor, 0),
            Err(PipelineError::Config(_))
        ));
        assert_eq!(scope.stats().in_use(), 0);
    }

    #[test]
    fn test_abandoned_batch_stream_releases_handle() {
        let (_dir, scope) = fixture(20);
        {
            let cursor = scope.open_cursor(&Query::new("SELECT n FROM nums")).unwrap();
            let mut stream = BatchStream::new(cursor, 3).unwrap();
            stream.next().unwrap().unwrap();
            assert_eq!(scope.stats().in_use(), 1);
        }
        assert_eq!(scope.stats().in_use(), 0);
    }

    #[test]
    fn test_pages_sizes() {
        for (rows, page_size, expected) in [
            (12, 5, vec![5, 5, 2]),
            (10, 5, vec![5, 5]),
            (3, 5, vec![3]),
            (0, 5, vec![]),
        ] {
            let (_dir, scope) = fixture(rows);
            let pages: Vec<Vec<Row>> =
                Paginator::new(scope.clone(), Query::new("SELECT n FROM nums ORDER BY n"), page_size)
                    .unwrap()
                    .collect::<Result<_>>()
                    .unwrap();
            assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), expected);
            assert_eq!(scope.stats().in_use(), 0);
        }
    }

    #[test]
    fn test_pages_bind_caller_params_first() {
        let (_dir, scope) = fixture(10);
        let query = Query::new("SELECT n FROM nums WHERE n >= ? ORDER BY n").bind(4);
        let pages: Vec<Vec<Row>> = Paginator::new(scope, query, 4)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(pages[0], vec![row![4], row![5], row![6], row![7]]);
        assert_eq!(pages[1], vec![row![8], row![9]]);
    }

    #[test]
    fn test_paginator_stops_after_error() {
        let (_dir, scope) = fixture(3);
        let mut pages = Paginator::new(scope, Query::new("SELECT * FROM missing"), 2).unwrap();
        assert!(matches!(pages.next(), Some(Err(PipelineError::Query(_)))));
        assert!(pages.next().is_none());
    }

    #[test]
    fn test_scalar_stream_yields_column() {
        let (_dir, scope) = fixture(7);
        let cursor = scope
            .open_cursor(&Query::new("SELECT n, n * 10 FROM nums ORDER BY n"))
            .unwrap();
        let values: Vec<Value> = ScalarStream::new(cursor, 1, 3)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(values, (0..7).map(|n| Value::Integer(n * 10)).collect::<Vec<_>>());
        assert_eq!(scope.stats().in_use(), 0);
    }

    #[test]
    fn test_scalar_stream_bad_column() {
        let (_dir, scope) = fixture(2);
        let cursor = scope.open_cursor(&Query::new("SELECT n FROM nums")).unwrap();
        let mut stream = ScalarStream::new(cursor, 3, 10).unwrap();
        assert!(matches!(stream.next(), Some(Err(PipelineError::InvalidState(_)))));
        assert!(stream.next().is_none());
        assert_eq!(scope.stats().in_use(), 0);
    }
}
