//! Cache Statistics
//!
//! Cache-line aligned counters for high-performance concurrent access, plus
//! per-owner counters for the per-user view. Counters only ever increase
//! until the process restarts or `clear` is called.
//!
//! Per-owner counters are kept for a bounded number of owners; activity from
//! owners beyond the limit still lands in the aggregate counters.

use crate::cache::tier::CacheTier;
use crate::error::ComputeError;
use chrono::Utc;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cache Line Size
// =============================================================================

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Default number of owners with individual counters
pub const DEFAULT_MAX_TRACKED_OWNERS: usize = 10_000;

// =============================================================================
// Per-Tier Counters (Cache-Line Aligned)
// =============================================================================

/// Counters for a single tier, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct TierCounters {
    /// Number of lookups that found a servable record
    pub hits: AtomicU64,
    /// Number of lookups that found nothing (including absorbed failures)
    pub misses: AtomicU64,
    /// Number of absorbed store failures
    pub errors: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
}

// Verify size at compile time
const _: () = assert!(std::mem::size_of::<TierCounters>() <= CACHE_LINE_SIZE);

impl TierCounters {
    #[inline]
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.touch();
    }

    fn snapshot(&self) -> TierStats {
        TierStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

// =============================================================================
// Per-Owner Counters
// =============================================================================

#[derive(Debug, Default)]
struct OwnerCounters {
    tier1_hits: AtomicU64,
    tier1_misses: AtomicU64,
    tier2_hits: AtomicU64,
    tier2_misses: AtomicU64,
    computations: AtomicU64,
    coalesced: AtomicU64,
}

impl OwnerCounters {
    fn snapshot(&self, owner_id: u64) -> OwnerStatistics {
        OwnerStatistics {
            owner_id,
            tier1: TierStats::new(
                self.tier1_hits.load(Ordering::Relaxed),
                self.tier1_misses.load(Ordering::Relaxed),
                0,
            ),
            tier2: TierStats::new(
                self.tier2_hits.load(Ordering::Relaxed),
                self.tier2_misses.load(Ordering::Relaxed),
                0,
            ),
            computations: self.computations.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time view of one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

impl TierStats {
    fn new(hits: u64, misses: u64, errors: u64) -> Self {
        Self {
            hits,
            misses,
            errors,
            hit_rate: hit_rate(hits, misses),
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Aggregate statistics across the whole cache
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub tier1: TierStats,
    pub tier2: TierStats,
    /// Compute invocations (single-flight leaders)
    pub computations: u64,
    /// Requests that waited on another request's computation
    pub coalesced_waits: u64,
    pub compute_failures: u64,
    pub compute_timeouts: u64,
    pub invalidations: u64,
    /// Invalidations where at least one tier could not be cleared
    pub degraded_invalidations: u64,
    /// Best-effort Tier 1 key count (None if Tier 1 could not report it)
    pub total_keys: Option<u64>,
}

impl CacheStatistics {
    pub fn tier(&self, tier: CacheTier) -> &TierStats {
        match tier {
            CacheTier::Fast => &self.tier1,
            CacheTier::Persisted => &self.tier2,
        }
    }

    pub fn hits(&self, tier: CacheTier) -> u64 {
        self.tier(tier).hits
    }

    pub fn misses(&self, tier: CacheTier) -> u64 {
        self.tier(tier).misses
    }

    /// Fraction of fetches served from any cache tier
    pub fn overall_hit_rate(&self) -> f64 {
        let hits = self.tier1.hits + self.tier2.hits;
        // Every fetch that reaches Tier 2 has already missed Tier 1
        hit_rate(hits, self.tier2.misses)
    }
}

/// Per-owner view
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OwnerStatistics {
    pub owner_id: u64,
    pub tier1: TierStats,
    pub tier2: TierStats,
    pub computations: u64,
    pub coalesced_waits: u64,
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// =============================================================================
// Stats Collector
// =============================================================================

/// Concurrent statistics sink shared by the orchestrator and invalidation
#[derive(Debug)]
pub struct StatsCollector {
    tier1: TierCounters,
    tier2: TierCounters,
    computations: AtomicU64,
    coalesced: AtomicU64,
    compute_failures: AtomicU64,
    compute_timeouts: AtomicU64,
    invalidations: AtomicU64,
    degraded_invalidations: AtomicU64,
    owners: DashMap<u64, OwnerCounters>,
    max_tracked_owners: usize,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::with_owner_limit(DEFAULT_MAX_TRACKED_OWNERS)
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep individual counters for at most `max_tracked_owners` owners
    pub fn with_owner_limit(max_tracked_owners: usize) -> Self {
        Self {
            tier1: TierCounters::default(),
            tier2: TierCounters::default(),
            computations: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            compute_failures: AtomicU64::new(0),
            compute_timeouts: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            degraded_invalidations: AtomicU64::new(0),
            owners: DashMap::new(),
            max_tracked_owners,
        }
    }

    /// Counters for `owner_id` (None once the owner limit is reached)
    fn owner(&self, owner_id: u64) -> Option<Ref<'_, u64, OwnerCounters>> {
        if let Some(counters) = self.owners.get(&owner_id) {
            return Some(counters);
        }
        if self.owners.len() >= self.max_tracked_owners {
            return None;
        }
        Some(self.owners.entry(owner_id).or_default().downgrade())
    }

    fn tier(&self, tier: CacheTier) -> &TierCounters {
        match tier {
            CacheTier::Fast => &self.tier1,
            CacheTier::Persisted => &self.tier2,
        }
    }

    /// Record a servable record found in `tier`
    pub fn record_hit(&self, owner_id: u64, tier: CacheTier) {
        self.tier(tier).record_hit();
        let Some(owner) = self.owner(owner_id) else {
            return;
        };
        match tier {
            CacheTier::Fast => owner.tier1_hits.fetch_add(1, Ordering::Relaxed),
            CacheTier::Persisted => owner.tier2_hits.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a lookup in `tier` that found nothing servable
    pub fn record_miss(&self, owner_id: u64, tier: CacheTier) {
        self.tier(tier).record_miss();
        let Some(owner) = self.owner(owner_id) else {
            return;
        };
        match tier {
            CacheTier::Fast => owner.tier1_misses.fetch_add(1, Ordering::Relaxed),
            CacheTier::Persisted => owner.tier2_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record an absorbed store failure
    pub fn record_store_error(&self, tier: CacheTier) {
        self.tier(tier).record_error();
    }

    /// Record a compute invocation by a single-flight leader
    pub fn record_computation(&self, owner_id: u64) {
        self.computations.fetch_add(1, Ordering::Relaxed);
        if let Some(owner) = self.owner(owner_id) {
            owner.computations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request served by another request's computation
    pub fn record_coalesced(&self, owner_id: u64) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
        if let Some(owner) = self.owner(owner_id) {
            owner.coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_compute_failure(&self, error: &ComputeError) {
        self.compute_failures.fetch_add(1, Ordering::Relaxed);
        if error.is_timeout() {
            self.compute_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_invalidation(&self, degraded: bool) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded_invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Create a snapshot of all counters
    pub fn snapshot(&self) -> CacheStatistics {
        CacheStatistics {
            tier1: self.tier1.snapshot(),
            tier2: self.tier2.snapshot(),
            computations: self.computations.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            compute_timeouts: self.compute_timeouts.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            degraded_invalidations: self.degraded_invalidations.load(Ordering::Relaxed),
            total_keys: None,
        }
    }

    /// Snapshot for one owner (None if the owner was never seen)
    pub fn owner_snapshot(&self, owner_id: u64) -> Option<OwnerStatistics> {
        self.owners
            .get(&owner_id)
            .map(|counters| counters.snapshot(owner_id))
    }

    /// Number of owners with recorded activity
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Reset every counter
    pub fn clear(&self) {
        self.tier1.reset();
        self.tier2.reset();
        for counter in [
            &self.computations,
            &self.coalesced,
            &self.compute_failures,
            &self.compute_timeouts,
            &self.invalidations,
            &self.degraded_invalidations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.owners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<TierCounters>(), CACHE_LINE_SIZE);
        assert!(std::mem::size_of::<TierCounters>() <= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_hit_miss_accounting() {
        let stats = StatsCollector::new();

        stats.record_hit(42, CacheTier::Fast);
        stats.record_hit(42, CacheTier::Fast);
        stats.record_miss(42, CacheTier::Fast);
        stats.record_hit(42, CacheTier::Persisted);
        stats.record_miss(7, CacheTier::Fast);
        stats.record_miss(7, CacheTier::Persisted);
        stats.record_computation(7);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits(CacheTier::Fast), 2);
        assert_eq!(snapshot.misses(CacheTier::Fast), 2);
        assert_eq!(snapshot.hits(CacheTier::Persisted), 1);
        assert_eq!(snapshot.misses(CacheTier::Persisted), 1);
        assert!((snapshot.tier1.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.computations, 1);
        // 3 of 4 fetches were served from a cache tier
        assert!((snapshot.overall_hit_rate() - 0.75).abs() < f64::EPSILON);

        let owner = stats.owner_snapshot(42).unwrap();
        assert_eq!(owner.tier1.hits, 2);
        assert_eq!(owner.tier1.misses, 1);
        assert_eq!(owner.tier2.hits, 1);
        assert_eq!(owner.computations, 0);

        let other = stats.owner_snapshot(7).unwrap();
        assert_eq!(other.computations, 1);
        assert!(stats.owner_snapshot(1000).is_none());
        assert_eq!(stats.owner_count(), 2);
    }

    #[test]
    fn test_failure_accounting() {
        let stats = StatsCollector::new();
        stats.record_compute_failure(&ComputeError::failed("boom"));
        stats.record_compute_failure(&ComputeError::TimedOut {
            after: Duration::from_secs(1),
        });
        stats.record_store_error(CacheTier::Fast);
        stats.record_invalidation(false);
        stats.record_invalidation(true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.compute_failures, 2);
        assert_eq!(snapshot.compute_timeouts, 1);
        assert_eq!(snapshot.tier1.errors, 1);
        assert_eq!(snapshot.invalidations, 2);
        assert_eq!(snapshot.degraded_invalidations, 1);
    }

    #[test]
    fn test_clear() {
        let stats = StatsCollector::new();
        stats.record_hit(1, CacheTier::Fast);
        stats.record_coalesced(1);
        stats.clear();

        assert_eq!(stats.snapshot(), CacheStatistics::default());
        assert_eq!(stats.owner_count(), 0);
    }

    #[test]
    fn test_owner_limit() {
        let stats = StatsCollector::with_owner_limit(2);
        stats.record_hit(1, CacheTier::Fast);
        stats.record_hit(2, CacheTier::Fast);
        stats.record_hit(3, CacheTier::Fast);
        stats.record_computation(4);
        stats.record_miss(1, CacheTier::Persisted);

        assert_eq!(stats.owner_count(), 2);
        assert!(stats.owner_snapshot(3).is_none());
        assert!(stats.owner_snapshot(4).is_none());
        assert_eq!(stats.owner_snapshot(1).unwrap().tier2.misses, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tier1.hits, 3);
        assert_eq!(snapshot.computations, 1);

        stats.clear();
        stats.record_hit(3, CacheTier::Fast);
        assert!(stats.owner_snapshot(3).is_some());
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(StatsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_hit(t % 2, CacheTier::Fast);
                        stats.record_miss(t % 2, CacheTier::Persisted);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tier1.hits, 8000);
        assert_eq!(snapshot.tier2.misses, 8000);
        assert_eq!(stats.owner_snapshot(0).unwrap().tier1.hits, 4000);
    }
}
