//! Tier 1: Fast Cache
//!
//! Short-lived, low-latency storage for serialized records. Every entry
//! carries a mandatory TTL; the store evicts on its own once it lapses.
//!
//! Two backends are provided:
//! - [`RedisFastCache`]: shared between service instances
//! - [`MemoryFastCache`]: process-local, for single-instance deployments and tests

mod memory;
mod redis;

pub use memory::MemoryFastCache;
pub use self::redis::{RedisFastCache, RedisSettings};

use crate::cache::key::{CacheKey, KeyPattern};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time figures reported by a Tier 1 backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastCacheStats {
    /// Keys currently held (best effort; Redis reports the whole database)
    pub total_keys: u64,
}

/// Trait for Tier 1 backends
///
/// Errors are reported, not hidden: the orchestrator decides whether a
/// failure is absorbed (reads, writes) or surfaced (invalidation reports).
#[async_trait]
pub trait FastCache: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Get the serialized record stored under `key`
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>>;

    /// Store a serialized record; `ttl` must be non-zero
    async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()>;

    /// Remove a single key, returning whether it existed
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every key matching `pattern`, returning how many were removed
    async fn delete_pattern(&self, pattern: &KeyPattern) -> Result<u64>;

    /// Backend statistics
    async fn stats(&self) -> Result<FastCacheStats>;

    /// Check backend health
    async fn health_check(&self) -> Result<bool>;
}

pub(crate) fn check_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(crate::error::Error::Configuration(
            "tier 1 entries require a non-zero TTL".to_string(),
        ));
    }
    Ok(())
}
