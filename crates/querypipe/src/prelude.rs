//! querypipe prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use querypipe::prelude::*;
//! ```

// Core types
pub use crate::{PipelineError, Query, Result, Row, TransactionOutcome, Value};

// Configs
pub use crate::{
    CacheConfig, FanOutConfig, PipelineConfig, RetryConfig, StoreConfig, StreamConfig,
    SynchronousMode,
};

// Traits
pub use crate::{Connector, RowCursor, StoreHandle};

// Implementations
pub use crate::{SqliteConnector, SqliteHandle};

// Pipeline building blocks
pub use crate::{
    log_queries, transaction, ConnectionScope, FanOut, Pipeline, QueryCache, RetryPolicy,
    RunningAggregate,
};

// Re-export common external deps
pub use anyhow;
pub use std::sync::Arc;
pub use tracing;
