use querypipe_core::{
    error::{PipelineError, Result},
    traits::RowCursor,
    Query, Row,
};
use rusqlite::{params_from_iter, Connection, Rows};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::convert::{bind_params, read_row};
use crate::error::classify;

type Batch = Result<Vec<Row>>;

/// Forward-only cursor over a SQLite statement
///
/// A rusqlite statement borrows its connection, so the connection and the
/// live statement are parked on a dedicated worker thread. `fetch(n)` sends
/// a request and waits for at most `n` rows; nothing is read ahead.
///
/// The first message from the worker reports whether the statement could be
/// prepared and bound, so a bad query fails at open rather than at the first
/// fetch.
pub struct SqliteCursor {
    requests: Option<Sender<usize>>,
    replies: Receiver<Batch>,
    worker: Option<JoinHandle<Result<()>>>,
    exhausted: bool,
    handle_id: u64,
}

impl SqliteCursor {
    pub(crate) fn spawn(conn: Connection, query: Query, handle_id: u64) -> Result<Self> {
        let (req_tx, req_rx) = mpsc::channel::<usize>();
        let (rep_tx, rep_rx) = mpsc::channel::<Batch>();

        let worker = thread::Builder::new()
            .name(format!("querypipe-cursor-{handle_id}"))
            .spawn(move || serve(conn, query, req_rx, rep_tx))?;

        let mut cursor = Self {
            requests: Some(req_tx),
            replies: rep_rx,
            worker: Some(worker),
            exhausted: false,
            handle_id,
        };

        match cursor.replies.recv() {
            Ok(Ok(_)) => {
                debug!(handle_id, "Cursor opened");
                Ok(cursor)
            }
            Ok(Err(e)) => {
                cursor.exhausted = true;
                if let Err(close_err) = cursor.shutdown() {
                    warn!(handle_id, error = %close_err, "Closing failed cursor");
                }
                Err(e)
            }
            Err(_) => {
                cursor.exhausted = true;
                cursor.shutdown()?;
                Err(PipelineError::Internal("cursor worker exited before start".into()))
            }
        }
    }

    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn shutdown(&mut self) -> Result<()> {
        // Dropping the sender ends the worker's request loop
        self.requests.take();
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| PipelineError::Internal("cursor worker panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl RowCursor for SqliteCursor {
    fn fetch(&mut self, n: usize) -> Result<Vec<Row>> {
        if self.exhausted || n == 0 {
            return Ok(Vec::new());
        }

        let sent = self
            .requests
            .as_ref()
            .map(|tx| tx.send(n).is_ok())
            .unwrap_or(false);
        if !sent {
            self.exhausted = true;
            return Err(PipelineError::InvalidState("cursor already closed".into()));
        }

        match self.replies.recv() {
            Ok(Ok(batch)) => {
                if batch.is_empty() {
                    self.exhausted = true;
                }
                Ok(batch)
            }
            Ok(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
            Err(_) => {
                self.exhausted = true;
                Err(PipelineError::Internal("cursor worker exited".into()))
            }
        }
    }

    fn close(mut self) -> Result<()> {
        self.shutdown()
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(handle_id = self.handle_id, error = %e, "Cursor close on drop failed");
        }
    }
}

fn serve(conn: Connection, query: Query, requests: Receiver<usize>, replies: Sender<Batch>) -> Result<()> {
    stream_rows(&conn, &query, &requests, &replies);
    conn.close().map_err(|(_, e)| classify(e))
}

fn stream_rows(conn: &Connection, query: &Query, requests: &Receiver<usize>, replies: &Sender<Batch>) {
    let mut stmt = match conn.prepare(query.text()) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = replies.send(Err(classify(e)));
            return;
        }
    };
    let columns = stmt.column_count();
    let mut rows = match stmt.query(params_from_iter(bind_params(query))) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = replies.send(Err(classify(e)));
            return;
        }
    };

    if replies.send(Ok(Vec::new())).is_err() {
        return;
    }

    while let Ok(n) = requests.recv() {
        let batch = next_batch(&mut rows, columns, n);
        let failed = batch.is_err();
        if replies.send(batch).is_err() || failed {
            return;
        }
    }
}

fn next_batch(rows: &mut Rows<'_>, columns: usize, n: usize) -> Batch {
    let mut batch = Vec::with_capacity(n.min(1024));
    while batch.len() < n {
        match rows.next().map_err(classify)? {
            Some(row) => batch.push(read_row(row, columns).map_err(classify)?),
            None => break,
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use crate::SqliteConnector;
    use querypipe_core::{
        row,
        traits::{Connector, RowCursor, StoreHandle},
        PipelineError, Query, StoreConfig,
    };
    use tempfile::tempdir;

    fn fixture(rows: i64) -> (tempfile::TempDir, SqliteConnector) {
        let dir = tempdir().unwrap();
        let connector = SqliteConnector::new(StoreConfig::new(dir.path().join("cursor.db")));
        let mut handle = connector.open().unwrap();
        handle
            .execute(&Query::new("CREATE TABLE nums (n INTEGER NOT NULL)"))
            .unwrap();
        for n in 0..rows {
            handle
                .execute(&Query::new("INSERT INTO nums (n) VALUES (?)").bind(n))
                .unwrap();
        }
        handle.close().unwrap();
        (dir, connector)
    }

    #[test]
    fn test_fetch_in_chunks() {
        let (_dir, connector) = fixture(7);
        let mut cursor = connector
            .open()
            .unwrap()
            .open_cursor(&Query::new("SELECT n FROM nums ORDER BY n"))
            .unwrap();

        let sizes: Vec<usize> = std::iter::from_fn(|| {
            let batch = cursor.fetch(3).unwrap();
            (!batch.is_empty()).then_some(batch.len())
        })
        .collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        // Exhausted cursors keep returning empty batches
        assert!(cursor.fetch(3).unwrap().is_empty());
        cursor.close().unwrap();
    }

    #[test]
    fn test_params_bound() {
        let (_dir, connector) = fixture(10);
        let mut cursor = connector
            .open()
            .unwrap()
            .open_cursor(&Query::new("SELECT n FROM nums WHERE n >= ? ORDER BY n").bind(8))
            .unwrap();
        assert_eq!(cursor.fetch(10).unwrap(), vec![row![8], row![9]]);
    }

    #[test]
    fn test_bad_query_fails_at_open() {
        let (_dir, connector) = fixture(0);
        let err = connector
            .open()
            .unwrap()
            .open_cursor(&Query::new("SELECT * FROM missing_table"))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Query(_)), "unexpected {err:?}");
    }

    #[test]
    fn test_abandoned_cursor_releases_connection() {
        let (_dir, connector) = fixture(100);
        {
            let mut cursor = connector
                .open()
                .unwrap()
                .open_cursor(&Query::new("SELECT n FROM nums"))
                .unwrap();
            assert_eq!(cursor.fetch(1).unwrap().len(), 1);
        }

        // A writer can take the lock once the abandoned reader is gone
        let mut writer = connector.open().unwrap();
        writer.begin().unwrap();
        writer.execute(&Query::new("DELETE FROM nums")).unwrap();
        writer.commit().unwrap();
    }
}
