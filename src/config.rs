//! Configuration Module
//!
//! Handles loading store and cache configuration from environment variables.

use std::env;
use std::time::Duration;

/// Store configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Connection URL of the backing Redis service
    pub redis_url: String,
    /// Maximum number of pooled connections
    pub pool_size: usize,
    /// Default key namespace, None = keys are used as given
    pub prefix: Option<String>,
    /// Secret for at-rest encryption, None = encryption disabled
    pub encryption_key: Option<String>,
    /// Deadline for timeout-bounded reads
    pub read_timeout: Duration,
}

impl StoreConfig {
    /// Creates a new StoreConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SEALKV_REDIS_URL` - Backing store URL (default: redis://127.0.0.1:6379)
    /// - `SEALKV_POOL_SIZE` - Pool size (default: 16)
    /// - `SEALKV_PREFIX` - Default key prefix (default: none)
    /// - `SEALKV_ENCRYPTION_KEY` - Encryption secret (default: none)
    /// - `SEALKV_READ_TIMEOUT_MS` - Read deadline in milliseconds (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env::var("SEALKV_REDIS_URL").unwrap_or(defaults.redis_url),
            pool_size: env::var("SEALKV_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pool_size),
            prefix: env::var("SEALKV_PREFIX").ok().filter(|p| !p.is_empty()),
            encryption_key: env::var("SEALKV_ENCRYPTION_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            read_timeout: env::var("SEALKV_READ_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.read_timeout),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            prefix: None,
            encryption_key: None,
            read_timeout: Duration::from_millis(2000),
        }
    }
}

/// In-process cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Target entry count for eviction, 0 = unbounded
    pub max_entries: usize,
    /// Entry lifetime in seconds measured from last populate, 0 = no expiry
    pub ttl: u64,
    /// Interval in seconds between background optimize passes
    pub optimize_interval: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SEALKV_CACHE_MAX_ENTRIES` - Eviction target (default: 0, unbounded)
    /// - `SEALKV_CACHE_TTL` - TTL in seconds (default: 300)
    /// - `SEALKV_OPTIMIZE_INTERVAL` - Optimize frequency in seconds (default: 1)
    pub fn from_env() -> Self {
        Self {
            max_entries: env::var("SEALKV_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            ttl: env::var("SEALKV_CACHE_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            optimize_interval: env::var("SEALKV_OPTIMIZE_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 0,
            ttl: 300,
            optimize_interval: 1,
        }
    }
}
