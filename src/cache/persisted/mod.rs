//! Tier 2: Persisted Cache
//!
//! Durable storage for computed records, outliving restarts and shared by
//! every service instance pointed at the same location. Records may carry
//! an expiry; expired records are never served and are swept by
//! [`PersistedCache::purge_expired`].

mod local;
mod memory;

pub use local::{LocalPersistedCache, LocalStoreConfig};
pub use memory::MemoryPersistedCache;

use crate::cache::key::{CacheKey, KeyPattern};
use crate::cache::record::CacheRecord;
use crate::error::Result;
use async_trait::async_trait;

// =============================================================================
// PersistedCache Trait
// =============================================================================

/// Trait for Tier 2 backends
///
/// Implementations must be safe to share between processes: every operation
/// works against the backing store directly rather than a process-local index.
#[async_trait]
pub trait PersistedCache: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Get the record for `key`; expired records read as absent
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>>;

    /// Store a record, replacing any previous one for the same key
    async fn put(&self, record: CacheRecord) -> Result<()>;

    /// Remove a single record, returning whether it existed
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every record matching `pattern`, returning how many were removed
    async fn delete_pattern(&self, pattern: &KeyPattern) -> Result<u64>;

    /// Remove every expired record, returning how many were removed
    async fn purge_expired(&self) -> Result<u64>;

    /// Number of stored records
    async fn entry_count(&self) -> Result<u64>;

    /// Check if storage is available/healthy
    async fn health_check(&self) -> Result<bool>;
}
