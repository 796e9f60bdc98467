use querypipe_core::{
    error::{PipelineError, Result},
    traits::StoreHandle,
    Query, Row,
};
use rusqlite::{params_from_iter, Connection};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::convert::{bind_params, read_row};
use crate::cursor::SqliteCursor;
use crate::error::classify;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// One open SQLite connection, owned by a single operation
///
/// Dropping a handle with an open transaction rolls it back before the
/// connection closes.
pub struct SqliteHandle {
    conn: Option<Connection>,
    id: u64,
}

impl SqliteHandle {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn: Some(conn),
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Process-unique id, used in logs
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the underlying connection (for schema setup and custom queries)
    pub fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidState("handle already released".into()))
    }

    fn take_conn(&mut self) -> Result<Connection> {
        self.conn
            .take()
            .ok_or_else(|| PipelineError::InvalidState("handle already released".into()))
    }
}

impl StoreHandle for SqliteHandle {
    type Cursor = SqliteCursor;

    fn execute(&mut self, query: &Query) -> Result<usize> {
        self.conn()?
            .execute(query.text(), params_from_iter(bind_params(query)))
            .map_err(classify)
    }

    fn query(&mut self, query: &Query) -> Result<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(query.text()).map_err(classify)?;
        let columns = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(bind_params(query)))
            .map_err(classify)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            out.push(read_row(row, columns).map_err(classify)?);
        }
        Ok(out)
    }

    fn open_cursor(mut self, query: &Query) -> Result<SqliteCursor> {
        let id = self.id;
        let conn = self.take_conn()?;
        SqliteCursor::spawn(conn, query.clone(), id)
    }

    fn begin(&mut self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            return Err(PipelineError::InvalidState(
                "transaction already in progress".into(),
            ));
        }
        conn.execute_batch("BEGIN IMMEDIATE TRANSACTION")
            .map_err(classify)
    }

    fn commit(&mut self) -> Result<()> {
        let conn = self.conn()?;
        if conn.is_autocommit() {
            return Err(PipelineError::InvalidState("no transaction in progress".into()));
        }
        // A busy COMMIT leaves the transaction open so the caller can roll back
        conn.execute_batch("COMMIT").map_err(classify)
    }

    fn rollback(&mut self) -> Result<()> {
        let conn = self.conn()?;
        // SQLite may already have rolled back on its own after a failure
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK").map_err(classify)
    }

    fn in_transaction(&self) -> bool {
        self.conn
            .as_ref()
            .map(|conn| !conn.is_autocommit())
            .unwrap_or(false)
    }

    fn close(mut self) -> Result<()> {
        if self.in_transaction() {
            warn!(handle_id = self.id, "Closing handle with open transaction, rolling back");
            self.rollback()?;
        }
        let conn = self.take_conn()?;
        conn.close().map_err(|(_, e)| classify(e))
    }
}

impl Drop for SqliteHandle {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_ref() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!(handle_id = self.id, error = %e, "Rollback on drop failed");
                }
            }
        }
    }
}
