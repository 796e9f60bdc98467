pub mod pipeline;
pub mod store;

pub use pipeline::{CacheConfig, FanOutConfig, PipelineConfig, RetryConfig, StreamConfig};
pub use store::{StoreConfig, SynchronousMode};
