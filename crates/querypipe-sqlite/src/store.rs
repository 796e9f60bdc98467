use querypipe_core::{
    error::{PipelineError, Result},
    traits::Connector,
    StoreConfig,
};
use rusqlite::{Connection, OpenFlags};

use crate::error::{classify, classify_open, is_busy};
use crate::handle::SqliteHandle;

/// Opens handles to one SQLite database file
///
/// Every call to [`Connector::open`] yields a fresh connection configured
/// from the same [`StoreConfig`]; handles are never pooled or shared.
pub struct SqliteConnector {
    config: StoreConfig,
    name: String,
}

impl SqliteConnector {
    pub fn new(config: StoreConfig) -> Self {
        let name = config.path.display().to_string();
        Self { config, name }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn open_flags(cfg: &StoreConfig) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if cfg.read_only {
            base | OpenFlags::SQLITE_OPEN_READ_ONLY
        } else if cfg.create_if_missing {
            base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        } else {
            base | OpenFlags::SQLITE_OPEN_READ_WRITE
        }
    }

    /// Configure SQLite connection
    fn configure_connection(conn: &Connection, cfg: &StoreConfig) -> Result<()> {
        // Must come first so the pragmas below honour it too
        conn.busy_timeout(cfg.busy_timeout()).map_err(pragma_error)?;

        if cfg.wal_mode && !cfg.read_only {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(pragma_error)?;
        }

        conn.pragma_update(None, "synchronous", cfg.synchronous.as_pragma())
            .map_err(pragma_error)?;

        let foreign_keys = if cfg.foreign_keys { "ON" } else { "OFF" };
        conn.pragma_update(None, "foreign_keys", foreign_keys)
            .map_err(pragma_error)?;

        Ok(())
    }
}

// SQLite opens lazily, so an unusable file often first fails here.
fn pragma_error(err: rusqlite::Error) -> PipelineError {
    if is_busy(&err) {
        return classify(err);
    }
    match classify_open(err) {
        err @ PipelineError::Connection(_) => err,
        other => PipelineError::Config(other.to_string()),
    }
}

impl Connector for SqliteConnector {
    type Handle = SqliteHandle;

    fn open(&self) -> Result<SqliteHandle> {
        let cfg = &self.config;

        // Create parent directory if needed
        if cfg.create_if_missing && !cfg.read_only {
            if let Some(parent) = cfg.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| PipelineError::Connection(e.to_string()))?;
                }
            }
        }

        let conn = Connection::open_with_flags(&cfg.path, Self::open_flags(cfg))
            .map_err(classify_open)?;

        Self::configure_connection(&conn, cfg)?;

        Ok(SqliteHandle::new(conn))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
