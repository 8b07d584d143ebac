//! Cache Tier Definitions
//!
//! Defines the two storage tiers, the label reported for each fetch, and the
//! per-namespace TTL policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// Default TTLs
// =============================================================================

/// Default Tier 1 TTL: 15 minutes
pub const DEFAULT_TIER1_TTL: Duration = Duration::from_secs(15 * 60);

/// Default Tier 2 TTL: 24 hours
pub const DEFAULT_TIER2_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Cache Tier
// =============================================================================

/// Storage tier in the lookup hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Tier 1: shared, volatile, low-latency key/value store
    Fast,
    /// Tier 2: durable store surviving Tier 1 restarts and outages
    Persisted,
}

impl CacheTier {
    /// Get all tiers in lookup order (Tier 1 -> Tier 2)
    pub fn lookup_order() -> &'static [CacheTier] {
        &[CacheTier::Fast, CacheTier::Persisted]
    }

    /// Get all tiers in write order (durable first)
    pub fn write_order() -> &'static [CacheTier] {
        &[CacheTier::Persisted, CacheTier::Fast]
    }

    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Fast => "tier1",
            CacheTier::Persisted => "tier2",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tier Served
// =============================================================================

/// Where a fetched value came from
///
/// Exposed for observability only; it never changes business semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierServed {
    #[serde(rename = "tier1")]
    Tier1,
    #[serde(rename = "tier2")]
    Tier2,
    #[serde(rename = "fresh")]
    Fresh,
}

impl TierServed {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierServed::Tier1 => "tier1",
            TierServed::Tier2 => "tier2",
            TierServed::Fresh => "fresh",
        }
    }
}

impl From<CacheTier> for TierServed {
    fn from(tier: CacheTier) -> Self {
        match tier {
            CacheTier::Fast => TierServed::Tier1,
            CacheTier::Persisted => TierServed::Tier2,
        }
    }
}

impl fmt::Display for TierServed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TTL Policy
// =============================================================================

/// TTLs applied to one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// Tier 1 TTL in seconds (mandatory, must be non-zero)
    pub tier1_ttl_secs: u64,
    /// Tier 2 TTL in seconds (None = no expiry, rely on invalidation)
    pub tier2_ttl_secs: Option<u64>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            tier1_ttl_secs: DEFAULT_TIER1_TTL.as_secs(),
            tier2_ttl_secs: Some(DEFAULT_TIER2_TTL.as_secs()),
        }
    }
}

impl TtlPolicy {
    /// Tier 1 TTL
    pub fn tier1_ttl(&self) -> Duration {
        Duration::from_secs(self.tier1_ttl_secs)
    }

    /// Tier 2 TTL (None = no expiry)
    pub fn tier2_ttl(&self) -> Option<Duration> {
        self.tier2_ttl_secs.map(Duration::from_secs)
    }

    /// Check that the policy keeps Tier 2 as the longer-lived safety net
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.tier1_ttl_secs == 0 {
            return Err("tier1_ttl_secs must be greater than zero".into());
        }
        if let Some(tier2) = self.tier2_ttl_secs {
            if tier2 < self.tier1_ttl_secs {
                return Err(format!(
                    "tier2_ttl_secs ({}) must not be shorter than tier1_ttl_secs ({})",
                    tier2, self.tier1_ttl_secs
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_order() {
        assert_eq!(CacheTier::lookup_order(), &[CacheTier::Fast, CacheTier::Persisted]);
        assert_eq!(CacheTier::write_order()[0], CacheTier::Persisted);
    }

    #[test]
    fn test_tier_served_labels() {
        assert_eq!(TierServed::from(CacheTier::Fast), TierServed::Tier1);
        assert_eq!(TierServed::from(CacheTier::Persisted), TierServed::Tier2);
        assert_eq!(serde_json::to_string(&TierServed::Fresh).unwrap(), "\"fresh\"");
        assert_eq!(TierServed::Tier1.to_string(), "tier1");
    }

    #[test]
    fn test_ttl_policy_validation() {
        assert!(TtlPolicy::default().validate().is_ok());

        let zero = TtlPolicy {
            tier1_ttl_secs: 0,
            tier2_ttl_secs: None,
        };
        assert!(zero.validate().is_err());

        let inverted = TtlPolicy {
            tier1_ttl_secs: 600,
            tier2_ttl_secs: Some(60),
        };
        assert!(inverted.validate().is_err());

        let no_expiry = TtlPolicy {
            tier1_ttl_secs: 60,
            tier2_ttl_secs: None,
        };
        assert!(no_expiry.validate().is_ok());
        assert_eq!(no_expiry.tier2_ttl(), None);
    }
}
