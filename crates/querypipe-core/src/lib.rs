//! querypipe core: traits and types for the resilient query pipeline
//!
//! This crate defines the pieces every layer of the pipeline agrees on:
//! - Error taxonomy: connection, transient, integrity and permanent failures
//! - Data model: values, rows, queries and their cache fingerprints
//! - Store connector traits: connector → handle → cursor
//! - Configuration for retry, caching, streaming and fan-out
//! - Stripe locks and optional metrics

pub mod config;
pub mod error;
pub mod lock_manager;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{
    CacheConfig, FanOutConfig, PipelineConfig, RetryConfig, StoreConfig, StreamConfig,
    SynchronousMode,
};
pub use error::{ErrorKind, PipelineError, Result};
pub use lock_manager::LockManager;
pub use traits::{Connector, RowCursor, StoreHandle};
pub use types::{Fingerprint, PageCursor, Placeholders, Query, Row, TransactionOutcome, Value};
