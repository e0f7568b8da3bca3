//! Freshness-aware response cache with LRU eviction and pluggable storage adapters.

pub mod adapter;
pub mod entry;
pub mod key;
#[cfg(feature = "redis")] pub mod redis;
pub mod store;

pub use adapter::{CacheAdapter, MemoryAdapter};
pub use entry::{CacheEntry, CacheResult, Freshness};
pub use key::{CacheKeyParts, canonical_json, generate_cache_key};
#[cfg(feature = "redis")] pub use redis::RedisAdapter;
pub use store::{Cache, CacheBuilder, CacheConfig, CacheStats, SetOptions};
