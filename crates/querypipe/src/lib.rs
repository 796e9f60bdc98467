//! querypipe: a resilient query execution pipeline
//!
//! Composable behaviours wrapped around a single store call:
//! - **Connection scope**: one handle per operation, released on every exit path
//! - **Query cache**: read-through, computed at most once per fingerprint
//! - **Retry**: bounded, fixed-delay retry of transient failures
//! - **Transactions**: commit on success, roll back and re-raise on failure
//! - **Streaming**: batches, `LIMIT`/`OFFSET` pages and scalar columns, fetched lazily
//! - **Fan-out**: independent reads run concurrently and joined in order
//!
//! # Quick Start
//!
//! ```no_run
//! use querypipe::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let pipeline = Pipeline::new(
//!     SqliteConnector::new(StoreConfig::new("./users.db")),
//!     PipelineConfig::default(),
//! )?;
//!
//! // First call hits the store, the second is served from the cache
//! let users = pipeline.read_cached(&Query::new("SELECT * FROM users"))?;
//! let again = pipeline.read_cached(&Query::new("SELECT * FROM users"))?;
//! assert_eq!(users, again);
//!
//! // Average age in O(1) memory
//! let ages = pipeline.stream_scalars(&Query::new("SELECT age FROM users"), 0)?;
//! let stats = RunningAggregate::consume(ages)?;
//! match stats.average() {
//!     Some(avg) => println!("average age: {avg}"),
//!     None => println!("no users"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod cache;
pub mod fanout;
pub mod pipeline;
pub mod prelude;
pub mod query_log;
pub mod retry;
pub mod scope;
pub mod stream;
pub mod transaction;

// Re-export core types
pub use querypipe_core::{
    config::{
        CacheConfig, FanOutConfig, PipelineConfig, RetryConfig, StoreConfig, StreamConfig,
        SynchronousMode,
    },
    error::{ErrorKind, PipelineError, Result},
    row,
    traits::{Connector, RowCursor, StoreHandle},
    types::{Fingerprint, PageCursor, Query, Row, TransactionOutcome, Value},
    LockManager,
};

// Re-export implementations
pub use querypipe_sqlite::{SqliteConnector, SqliteCursor, SqliteHandle};

// Re-export main types from this crate
pub use aggregate::{Decimal, RunningAggregate};
pub use cache::{CacheStats, QueryCache};
pub use fanout::FanOut;
pub use pipeline::Pipeline;
pub use query_log::log_queries;
pub use retry::RetryPolicy;
pub use scope::{ConnectionScope, ScopeStats, ScopedCursor};
pub use stream::{BatchStream, Paginator, ScalarStream};
