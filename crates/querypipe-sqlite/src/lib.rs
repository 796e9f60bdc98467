//! SQLite store connector for the querypipe pipeline
//!
//! Implements the connector → handle → cursor traits on top of `rusqlite`.
//!
//! Key features:
//! - One fresh connection per handle, configured from [`StoreConfig`](querypipe_core::StoreConfig)
//! - WAL mode and `BEGIN IMMEDIATE` transactions
//! - Forward-only cursors that fetch on demand
//! - Classification of SQLite result codes into transient, integrity and
//!   connection failures

mod convert;
pub mod cursor;
pub mod error;
pub mod handle;
pub mod store;

pub use cursor::SqliteCursor;
pub use handle::SqliteHandle;
pub use store::SqliteConnector;
