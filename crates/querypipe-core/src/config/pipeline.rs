use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds (default: 1000)
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Query cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether reads go through the cache at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of lock stripes guarding per-key computation (default: 256)
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,

    /// How long a miss waits for another caller computing the same key
    /// before giving up with `LockTimeout` (default: 30000)
    #[serde(default = "default_cache_lock_timeout")]
    pub lock_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            lock_stripes: default_lock_stripes(),
            lock_timeout_ms: default_cache_lock_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Rows per batch for batch streaming (default: 5)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per page for lazy pagination (default: 5)
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Rows fetched per round-trip when streaming single values (default: 1000)
    ///
    /// Scalar streams yield one value at a time but fetch in chunks to keep
    /// round-trips down while memory stays constant.
    #[serde(default = "default_scalar_chunk_size")]
    pub scalar_chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            scalar_chunk_size: default_scalar_chunk_size(),
        }
    }
}

/// Concurrent fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Upper bound on the whole join in milliseconds (default: 30000)
    #[serde(default = "default_fan_out_timeout")]
    pub timeout_ms: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_fan_out_timeout(),
        }
    }
}

impl FanOutConfig {
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings for the composed pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub fan_out: FanOutConfig,

    /// Log every statement before it runs (default: true)
    #[serde(default = "default_true")]
    pub log_queries: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            stream: StreamConfig::default(),
            fan_out: FanOutConfig::default(),
            log_queries: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_lock_stripes() -> usize {
    256
}

fn default_cache_lock_timeout() -> u64 {
    30_000
}

fn default_batch_size() -> usize {
    5
}

fn default_page_size() -> u64 {
    5
}

fn default_scalar_chunk_size() -> usize {
    1000
}

fn default_fan_out_timeout() -> u64 {
    30_000
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_fan_out(mut self, fan_out: FanOutConfig) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.cache.lock_stripes == 0 {
            return Err(PipelineError::Config(
                "cache.lock_stripes must be positive".into(),
            ));
        }
        if self.stream.batch_size == 0 || self.stream.page_size == 0 {
            return Err(PipelineError::Config(
                "stream batch_size and page_size must be positive".into(),
            ));
        }
        if self.stream.scalar_chunk_size == 0 {
            return Err(PipelineError::Config(
                "stream.scalar_chunk_size must be positive".into(),
            ));
        }
        if self.fan_out.timeout_ms == 0 {
            return Err(PipelineError::Config(
                "fan_out.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
