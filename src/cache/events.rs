//! Cache Events
//!
//! Events emitted by the cache for monitoring and observability.

use crate::cache::key::{CacheKey, KeyPattern};
use crate::cache::tier::{CacheTier, TierServed};
use serde::{Deserialize, Serialize};

/// Events emitted by the cache system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Fetch served from a cache tier
    Hit { key: String, tier: CacheTier },

    /// Tier 1 was refilled from Tier 2
    Backfill { key: String },

    /// Fetch missed every tier (or bypassed them)
    Miss { key: String, bypass: bool },

    /// Compute finished and its result was delivered
    Computed {
        key: String,
        duration_ms: u64,
        /// False when an invalidation raced the computation and the
        /// result was returned without being cached
        stored: bool,
    },

    /// Compute failed; nothing was cached
    ComputeFailed { key: String, error: String },

    /// A store operation failed and was absorbed
    StoreError {
        tier: CacheTier,
        operation: String,
        error: String,
    },

    /// Entries matching a pattern were removed from both tiers
    Invalidated {
        pattern: KeyPattern,
        tier1_removed: u64,
        tier2_removed: u64,
    },

    /// At least one tier could not be cleared for a pattern
    InvalidationDegraded {
        pattern: KeyPattern,
        tier: CacheTier,
        error: String,
    },
}

impl CacheEvent {
    pub fn hit(key: &CacheKey, tier: CacheTier) -> Self {
        CacheEvent::Hit {
            key: key.to_storage_key(),
            tier,
        }
    }

    pub fn miss(key: &CacheKey, bypass: bool) -> Self {
        CacheEvent::Miss {
            key: key.to_storage_key(),
            bypass,
        }
    }

    pub fn store_error(tier: CacheTier, operation: &str, error: &crate::error::Error) -> Self {
        CacheEvent::StoreError {
            tier,
            operation: operation.to_string(),
            error: error.to_string(),
        }
    }

    /// Get the key associated with this event (if any)
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Backfill { key }
            | CacheEvent::Miss { key, .. }
            | CacheEvent::Computed { key, .. }
            | CacheEvent::ComputeFailed { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Tier label for fetch-path events
    pub fn served(&self) -> Option<TierServed> {
        match self {
            CacheEvent::Hit { tier, .. } => Some((*tier).into()),
            CacheEvent::Computed { .. } => Some(TierServed::Fresh),
            _ => None,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CacheEvent::ComputeFailed { .. }
                | CacheEvent::StoreError { .. }
                | CacheEvent::InvalidationDegraded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::Params;

    #[test]
    fn test_event_accessors() {
        let key = CacheKey::build("forecast", 42, &Params::new()).unwrap();

        let hit = CacheEvent::hit(&key, CacheTier::Persisted);
        assert_eq!(hit.key(), Some(key.to_storage_key().as_str()));
        assert_eq!(hit.served(), Some(TierServed::Tier2));
        assert!(!hit.is_error());

        let degraded = CacheEvent::InvalidationDegraded {
            pattern: KeyPattern::owner(42),
            tier: CacheTier::Fast,
            error: "connection refused".into(),
        };
        assert!(degraded.is_error());
        assert_eq!(degraded.key(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = CacheEvent::Invalidated {
            pattern: KeyPattern::owner(42),
            tier1_removed: 2,
            tier2_removed: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "invalidated");
        assert_eq!(json["pattern"]["scope"], "owner");
        assert_eq!(json["pattern"]["owner_id"], 42);
    }
}
