use crate::error::Result;
use crate::types::{Query, Row};

/// Forward-only cursor over the rows of one statement.
///
/// A cursor owns the handle it was opened from; closing or dropping the
/// cursor releases that handle.
pub trait RowCursor: Send {
    /// Fetch up to `n` more rows. An empty result means the cursor is
    /// exhausted.
    fn fetch(&mut self, n: usize) -> Result<Vec<Row>>;

    /// Release the cursor and its handle, reporting any close failure.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// An open handle to the store.
///
/// Handles are owned by exactly one operation at a time and closed exactly
/// once, either through [`StoreHandle::close`] or on drop.
pub trait StoreHandle: Send {
    type Cursor: RowCursor;

    /// Run a statement that does not return rows; returns affected rows.
    fn execute(&mut self, query: &Query) -> Result<usize>;

    /// Run a statement and materialise every row it returns.
    fn query(&mut self, query: &Query) -> Result<Vec<Row>>;

    /// Turn this handle into a cursor over `query`.
    fn open_cursor(self, query: &Query) -> Result<Self::Cursor>
    where
        Self: Sized;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether a transaction started with [`StoreHandle::begin`] is open.
    fn in_transaction(&self) -> bool;

    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Factory for store handles.
///
/// Failing to open surfaces as `PipelineError::Connection` and is never
/// retried by the pipeline.
pub trait Connector: Send + Sync {
    type Handle: StoreHandle;

    fn open(&self) -> Result<Self::Handle>;

    /// Human readable name of the store, used in logs.
    fn name(&self) -> &str;
}
