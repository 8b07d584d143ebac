//! In-memory Tier 2 backend
//!
//! Holds records in a process-local map. Used for tests and for running the
//! service without a persistence volume.

use super::PersistedCache;
use crate::cache::key::{CacheKey, KeyPattern};
use crate::cache::record::CacheRecord;
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Map-backed Tier 2 cache
pub struct MemoryPersistedCache {
    records: RwLock<HashMap<String, CacheRecord>>,
    available: AtomicBool,
}

impl MemoryPersistedCache {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Set backend availability (for testing failure scenarios)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable {
                tier: CacheTier::Persisted,
                reason: "memory backend offline".to_string(),
            })
        }
    }
}

impl Default for MemoryPersistedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistedCache for MemoryPersistedCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>> {
        self.ensure_available()?;
        let storage_key = key.to_storage_key();

        let record = match self.records.read().get(&storage_key) {
            Some(record) => record.clone(),
            None => return Ok(None),
        };

        if record.is_expired() {
            let mut records = self.records.write();
            if records.get(&storage_key).map(|r| r.is_expired()).unwrap_or(false) {
                records.remove(&storage_key);
            }
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn put(&self, record: CacheRecord) -> Result<()> {
        self.ensure_available()?;
        self.records
            .write()
            .insert(record.key.to_storage_key(), record);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.records.write().remove(&key.to_storage_key()).is_some())
    }

    async fn delete_pattern(&self, pattern: &KeyPattern) -> Result<u64> {
        self.ensure_available()?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !pattern.matches(&record.key));
        Ok((before - records.len()) as u64)
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }

    async fn entry_count(&self) -> Result<u64> {
        self.ensure_available()?;
        Ok(self.records.read().len() as u64)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}
