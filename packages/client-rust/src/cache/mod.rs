//! Bounded in-memory cache with entry, byte, and TTL caps.

pub mod lru;

pub use lru::{BoundedCache, CacheMetrics};
