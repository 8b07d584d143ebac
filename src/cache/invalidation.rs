//! Cache Invalidation
//!
//! Removes cached results when the records they were computed from change.
//! Domain writers await these calls before acknowledging their own write, so
//! once a mutation is confirmed no reader is served a pre-mutation result.
//!
//! Invalidation never fails the caller. A tier that cannot be cleared is
//! reported, counted and logged; its entries still lapse with their TTL.

use crate::cache::events::CacheEvent;
use crate::cache::key::{validate_namespace, KeyPattern};
use crate::cache::orchestrator::CacheOrchestrator;
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

// =============================================================================
// Mutation Events
// =============================================================================

/// Kind of domain record a cached computation can depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Account,
    Transaction,
    Bill,
    Income,
    Goal,
    Budget,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Account => "account",
            RecordKind::Transaction => "transaction",
            RecordKind::Bill => "bill",
            RecordKind::Income => "income",
            RecordKind::Goal => "goal",
            RecordKind::Budget => "budget",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    Created,
    Updated,
    Deleted,
}

/// A create/update/delete of a record owned by `owner_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub owner_id: u64,
    pub record: RecordKind,
    pub action: MutationAction,
}

impl MutationEvent {
    pub fn new(owner_id: u64, record: RecordKind, action: MutationAction) -> Self {
        Self {
            owner_id,
            record,
            action,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Which namespaces each record kind feeds
///
/// Kinds without an entry invalidate every namespace of the owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    pub dependencies: HashMap<RecordKind, Vec<String>>,
}

impl InvalidationConfig {
    pub fn validate(&self) -> Result<()> {
        for (kind, namespaces) in &self.dependencies {
            if namespaces.is_empty() {
                return Err(Error::Configuration(format!(
                    "invalidation dependency for '{}' lists no namespaces",
                    kind
                )));
            }
            for namespace in namespaces {
                validate_namespace(namespace)
                    .map_err(|e| Error::Configuration(format!("dependency for '{}': {}", kind, e)))?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Result of clearing one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierOutcome {
    Cleared { removed: u64 },
    Failed { error: String },
}

impl TierOutcome {
    fn from_result(result: Result<u64>) -> Self {
        match result {
            Ok(removed) => TierOutcome::Cleared { removed },
            Err(e) => TierOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn removed(&self) -> u64 {
        match self {
            TierOutcome::Cleared { removed } => *removed,
            TierOutcome::Failed { .. } => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TierOutcome::Failed { .. })
    }
}

/// Per-tier result of one invalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub pattern: KeyPattern,
    pub tier1: TierOutcome,
    pub tier2: TierOutcome,
}

impl InvalidationReport {
    /// True if at least one tier could not be cleared
    pub fn is_degraded(&self) -> bool {
        self.tier1.is_failed() || self.tier2.is_failed()
    }

    pub fn removed(&self) -> u64 {
        self.tier1.removed() + self.tier2.removed()
    }

    pub fn outcome(&self, tier: CacheTier) -> &TierOutcome {
        match tier {
            CacheTier::Fast => &self.tier1,
            CacheTier::Persisted => &self.tier2,
        }
    }
}

// =============================================================================
// Invalidation Manager
// =============================================================================

/// Deletes cached results by owner or namespace pattern
pub struct InvalidationManager {
    cache: Arc<CacheOrchestrator>,
    config: InvalidationConfig,
}

impl InvalidationManager {
    pub fn new(cache: Arc<CacheOrchestrator>, config: InvalidationConfig) -> Self {
        Self { cache, config }
    }

    /// Invalidate every cached result of `owner_id`
    pub async fn invalidate_owner(&self, owner_id: u64) -> InvalidationReport {
        self.invalidate(KeyPattern::owner(owner_id)).await
    }

    /// Invalidate the results of `owner_id` in one namespace
    pub async fn invalidate_namespace_for_owner(
        &self,
        namespace: &str,
        owner_id: u64,
    ) -> Result<InvalidationReport> {
        let pattern = KeyPattern::namespace_owner(namespace, owner_id)?;
        Ok(self.invalidate(pattern).await)
    }

    /// Invalidate whatever `event` may have made stale
    pub async fn on_mutation(&self, event: &MutationEvent) -> Vec<InvalidationReport> {
        let patterns = self.patterns_for(event);
        info!(
            owner_id = event.owner_id,
            record = %event.record,
            action = ?event.action,
            patterns = patterns.len(),
            "Handling mutation"
        );

        let mut reports = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            reports.push(self.invalidate(pattern).await);
        }
        reports
    }

    /// Patterns a mutation must clear
    pub fn patterns_for(&self, event: &MutationEvent) -> Vec<KeyPattern> {
        match self.config.dependencies.get(&event.record) {
            Some(namespaces) => {
                let patterns: Vec<KeyPattern> = namespaces
                    .iter()
                    .filter_map(|ns| KeyPattern::namespace_owner(ns, event.owner_id).ok())
                    .collect();
                if patterns.is_empty() {
                    vec![KeyPattern::owner(event.owner_id)]
                } else {
                    patterns
                }
            }
            None => vec![KeyPattern::owner(event.owner_id)],
        }
    }

    /// Delete `pattern` from Tier 2, then Tier 1
    ///
    /// Tier 2 goes first so a concurrent reader cannot refill Tier 1 from a
    /// Tier 2 record this call is about to remove.
    pub async fn invalidate(&self, pattern: KeyPattern) -> InvalidationReport {
        self.cache.bump_epoch(pattern.owner_id());

        let tier2 = TierOutcome::from_result(self.cache.persisted().delete_pattern(&pattern).await);
        let tier1 = TierOutcome::from_result(self.cache.fast().delete_pattern(&pattern).await);

        let report = InvalidationReport {
            pattern,
            tier1,
            tier2,
        };
        self.record(&report);
        report
    }

    fn record(&self, report: &InvalidationReport) {
        let degraded = report.is_degraded();
        self.cache.stats().record_invalidation(degraded);

        for tier in CacheTier::lookup_order() {
            if let TierOutcome::Failed { error } = report.outcome(*tier) {
                warn!(
                    pattern = %report.pattern,
                    tier = %tier,
                    error = %error,
                    "Invalidation degraded, stale entries expire with their TTL"
                );
                self.cache.emit_event(CacheEvent::InvalidationDegraded {
                    pattern: report.pattern.clone(),
                    tier: *tier,
                    error: error.clone(),
                });
            }
        }

        if !degraded {
            info!(
                pattern = %report.pattern,
                tier1_removed = report.tier1.removed(),
                tier2_removed = report.tier2.removed(),
                "Invalidated cache entries"
            );
        }
        self.cache.emit_event(CacheEvent::Invalidated {
            pattern: report.pattern.clone(),
            tier1_removed: report.tier1.removed(),
            tier2_removed: report.tier2.removed(),
        });
    }

    pub fn config(&self) -> &InvalidationConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fast::MemoryFastCache;
    use crate::cache::key::Params;
    use crate::cache::orchestrator::{FetchOptions, Fetched, OrchestratorSettings};
    use crate::cache::persisted::{MemoryPersistedCache, PersistedCache};
    use crate::cache::tier::TierServed;
    use crate::error::ComputeError;
    use assert_matches::assert_matches;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Forecast {
        owner_id: u64,
        horizon_days: i64,
        version: usize,
    }

    struct Harness {
        cache: Arc<CacheOrchestrator>,
        manager: InvalidationManager,
        fast: Arc<MemoryFastCache>,
        persisted: Arc<MemoryPersistedCache>,
        calls: AtomicUsize,
    }

    fn harness(config: InvalidationConfig) -> Harness {
        let fast = Arc::new(MemoryFastCache::new());
        let persisted = Arc::new(MemoryPersistedCache::new());
        let cache = CacheOrchestrator::new(fast.clone(), persisted.clone(), OrchestratorSettings::default());
        Harness {
            manager: InvalidationManager::new(cache.clone(), config),
            cache,
            fast,
            persisted,
            calls: AtomicUsize::new(0),
        }
    }

    impl Harness {
        async fn fetch(&self, namespace: &str, owner_id: u64, horizon: i64) -> Fetched<Forecast> {
            let params = Params::new().with("horizonDays", horizon);
            self.cache
                .fetch(namespace, owner_id, &params, FetchOptions::default(), || async {
                    let version = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, ComputeError>(Forecast {
                        owner_id,
                        horizon_days: horizon,
                        version,
                    })
                })
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_invalidate_owner_leaves_other_owners_cached() {
        let h = harness(InvalidationConfig::default());
        h.fetch("forecast", 42, 90).await;
        h.fetch("cashflow", 42, 30).await;
        h.fetch("forecast", 7, 90).await;

        let report = h.manager.invalidate_owner(42).await;
        assert!(!report.is_degraded());
        assert_eq!(report.tier1, TierOutcome::Cleared { removed: 2 });
        assert_eq!(report.tier2, TierOutcome::Cleared { removed: 2 });

        assert_eq!(h.fetch("forecast", 42, 90).await.tier, TierServed::Fresh);
        assert_eq!(h.fetch("cashflow", 42, 30).await.tier, TierServed::Fresh);
        assert_eq!(h.fetch("forecast", 7, 90).await.tier, TierServed::Tier1);
    }

    #[tokio::test]
    async fn test_invalidate_namespace_only() {
        let h = harness(InvalidationConfig::default());
        h.fetch("forecast", 42, 90).await;
        h.fetch("cashflow", 42, 30).await;

        let report = h
            .manager
            .invalidate_namespace_for_owner("forecast", 42)
            .await
            .unwrap();
        assert_eq!(report.removed(), 2);

        assert_eq!(h.fetch("forecast", 42, 90).await.tier, TierServed::Fresh);
        assert_eq!(h.fetch("cashflow", 42, 30).await.tier, TierServed::Tier1);

        assert_matches!(
            h.manager.invalidate_namespace_for_owner("bad:ns", 42).await,
            Err(Error::InvalidKey(_))
        );
    }

    #[tokio::test]
    async fn test_tier1_outage_degrades_but_clears_tier2() {
        let h = harness(InvalidationConfig::default());
        h.fetch("forecast", 42, 90).await;
        let mut events = h.cache.subscribe();

        h.fast.set_available(false);
        let report = h.manager.invalidate_owner(42).await;

        assert!(report.is_degraded());
        assert!(report.tier1.is_failed());
        assert_eq!(report.tier2, TierOutcome::Cleared { removed: 1 });
        assert_eq!(h.cache.stats().snapshot().degraded_invalidations, 1);
        assert_matches!(
            events.recv().await.unwrap(),
            CacheEvent::InvalidationDegraded { tier: CacheTier::Fast, .. }
        );
        assert_eq!(h.persisted.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mutation_uses_dependency_map() {
        let mut config = InvalidationConfig::default();
        config
            .dependencies
            .insert(RecordKind::Transaction, vec!["forecast".to_string()]);
        let h = harness(config);
        h.fetch("forecast", 42, 90).await;
        h.fetch("cashflow", 42, 30).await;

        let reports = h
            .manager
            .on_mutation(&MutationEvent::new(42, RecordKind::Transaction, MutationAction::Created))
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].pattern, KeyPattern::namespace_owner("forecast", 42).unwrap());
        assert_eq!(h.fetch("cashflow", 42, 30).await.tier, TierServed::Tier1);

        // Unmapped kinds clear the whole owner
        let reports = h
            .manager
            .on_mutation(&MutationEvent::new(42, RecordKind::Goal, MutationAction::Deleted))
            .await;
        assert_eq!(reports[0].pattern, KeyPattern::owner(42));
        assert_eq!(h.fetch("cashflow", 42, 30).await.tier, TierServed::Fresh);
    }

    #[tokio::test]
    async fn test_invalidation_racing_computation_is_not_cached() {
        let h = harness(InvalidationConfig::default());

        let (fetched, _) = tokio::join!(h.fetch("forecast", 42, 90), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            h.manager.invalidate_owner(42).await
        });
        assert_eq!(fetched.tier, TierServed::Fresh);

        // The racing result was not cached
        let next = h.fetch("forecast", 42, 90).await;
        assert_eq!(next.tier, TierServed::Fresh);
        assert_eq!(next.value.version, 2);
    }

    #[tokio::test]
    async fn test_fetch_after_invalidation_starts_its_own_computation() {
        let h = harness(InvalidationConfig::default());
        let params = Params::new().with("horizonDays", 90);

        let slow = h.cache.fetch("forecast", 42, &params, FetchOptions::default(), || async {
            let version = h.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ComputeError>(Forecast {
                owner_id: 42,
                horizon_days: 90,
                version,
            })
        });
        let (before, after) = tokio::join!(slow, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.manager.invalidate_owner(42).await;
            h.fetch("forecast", 42, 90).await
        });

        assert_eq!(before.unwrap().value.version, 1);
        assert_eq!(after.tier, TierServed::Fresh);
        assert_eq!(after.value.version, 2);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.cache.stats().snapshot().coalesced_waits, 0);

        // Only the post-invalidation result was cached
        let cached = h.fetch("forecast", 42, 90).await;
        assert_eq!(cached.tier, TierServed::Tier1);
        assert_eq!(cached.value.version, 2);
    }

    #[tokio::test]
    async fn test_owner_42_scenario() {
        let h = harness(InvalidationConfig::default());

        let (a, b, c) = tokio::join!(
            h.fetch("forecast", 42, 90),
            h.fetch("forecast", 42, 90),
            h.fetch("forecast", 42, 90)
        );
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.value, b.value);
        assert_eq!(b.value, c.value);
        assert!([&a, &b, &c].iter().all(|f| f.tier == TierServed::Fresh));

        let stats = h.cache.stats().snapshot();
        assert_eq!(stats.tier1.hits + stats.tier2.hits, 0);
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.coalesced_waits, 2);

        // Owner 42 edits a transaction
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.manager
            .on_mutation(&MutationEvent::new(42, RecordKind::Transaction, MutationAction::Updated))
            .await;

        let after = h.fetch("forecast", 42, 90).await;
        assert_eq!(after.tier, TierServed::Fresh);
        assert!(after.computed_at > a.computed_at);
        assert_eq!(after.value.version, 2);
    }

    #[test]
    fn test_config_validation() {
        let mut config = InvalidationConfig::default();
        assert!(config.validate().is_ok());

        config.dependencies.insert(RecordKind::Bill, vec![]);
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        config
            .dependencies
            .insert(RecordKind::Bill, vec!["forecast:*".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_yaml() {
        let config: InvalidationConfig =
            serde_yaml::from_str("dependencies:\n  transaction: [forecast]\n  bill: [forecast, cashflow]\n")
                .unwrap();
        assert_eq!(config.dependencies[&RecordKind::Bill].len(), 2);

        let event: MutationEvent =
            serde_json::from_str(r#"{"owner_id": 42, "record": "transaction", "action": "updated"}"#).unwrap();
        assert_eq!(event.record, RecordKind::Transaction);
    }
}
