//! Client-level configuration.
//!
//! Cache caps are read on every cache operation (via `ArcSwap` in the
//! engine), so reconfiguring them at runtime takes effect without a restart.

use std::time::Duration;

/// In-memory cache caps. A cap of `0` disables that cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether the provider consults the in-memory cache at all.
    pub enabled: bool,
    /// Maximum number of entries. 0 = unbounded.
    pub max_entries: usize,
    /// Maximum total size in bytes. 0 = unbounded.
    pub max_bytes: u64,
    /// Maximum entry age in milliseconds. 0 = no TTL.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 4096,
            max_bytes: 32 * 1024 * 1024,
            ttl_ms: 30 * 60 * 1000,
        }
    }
}

/// Background fetcher sleep schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct FetcherConfig {
    /// Sleep after the first iteration; also the value restored by a wake.
    pub min_sleep: Duration,
    /// Upper bound for the geometric sleep schedule.
    pub max_sleep: Duration,
    /// Multiplier applied to the sleep after each iteration.
    pub backoff_multiplier: f64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_millis(5),
            max_sleep: Duration::from_secs(10),
            backoff_multiplier: 1.4,
        }
    }
}

/// Synchronizer retry backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5 * 60),
            multiplier: 2.0,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Server base URL, e.g. `https://music.example.com`.
    pub base_url: String,
    pub cache: CacheConfig,
    pub fetcher: FetcherConfig,
    pub sync_retry: RetryConfig,
}
