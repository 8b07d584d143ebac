//! Cache Orchestrator
//!
//! Serves fetches from Tier 1, then Tier 2, then a single-flight computation,
//! writing fresh results durable tier first. Store failures only cost
//! latency: they are logged, counted and treated as a miss or a no-op.

use crate::cache::events::CacheEvent;
use crate::cache::fast::FastCache;
use crate::cache::key::{CacheKey, Params};
use crate::cache::metrics::{
    CacheStatistics, OwnerStatistics, StatsCollector, DEFAULT_MAX_TRACKED_OWNERS,
};
use crate::cache::persisted::PersistedCache;
use crate::cache::record::CacheRecord;
use crate::cache::singleflight::SingleFlight;
use crate::cache::tier::{CacheTier, TierServed, TtlPolicy};
use crate::compute::{CacheableRequest, ComputeEngine};
use crate::error::{ComputeError, Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Runtime policy for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Policy for namespaces without an entry in `namespaces`
    pub default_policy: TtlPolicy,
    /// Per-namespace TTL policies
    pub namespaces: HashMap<String, TtlPolicy>,
    /// Default bound on a computation (None = unbounded)
    pub compute_timeout: Option<Duration>,
    /// Interval between Tier 2 expiry sweeps
    pub sweep_interval: Duration,
    /// Event channel capacity
    pub event_channel_capacity: usize,
    /// Owners with individual statistics
    pub max_tracked_owners: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_policy: TtlPolicy::default(),
            namespaces: HashMap::new(),
            compute_timeout: Some(Duration::from_secs(30)),
            sweep_interval: Duration::from_secs(600),
            event_channel_capacity: 1024,
            max_tracked_owners: DEFAULT_MAX_TRACKED_OWNERS,
        }
    }
}

impl OrchestratorSettings {
    pub fn policy_for(&self, namespace: &str) -> &TtlPolicy {
        self.namespaces
            .get(namespace)
            .unwrap_or(&self.default_policy)
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Skip both tier lookups, compute, and refresh both tiers
    pub bypass_cache: bool,
    /// Override the namespace's Tier 1 TTL
    pub tier1_ttl: Option<Duration>,
    /// Override the namespace's Tier 2 TTL
    pub tier2_ttl: Option<Duration>,
    /// Override the configured compute timeout
    pub compute_timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn bypass() -> Self {
        Self {
            bypass_cache: true,
            ..Default::default()
        }
    }

    pub fn with_tier2_ttl(mut self, ttl: Duration) -> Self {
        self.tier2_ttl = Some(ttl);
        self
    }

    pub fn with_compute_timeout(mut self, timeout: Duration) -> Self {
        self.compute_timeout = Some(timeout);
        self
    }
}

/// A fetched value and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fetched<T> {
    pub value: T,
    pub tier: TierServed,
    /// When the value was computed (unchanged by caching)
    pub computed_at: DateTime<Utc>,
}

/// Availability of each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub tier1: bool,
    pub tier2: bool,
    /// Keys currently being computed
    pub in_flight: usize,
}

impl CacheHealth {
    /// Fetches still succeed when degraded, only slower
    pub fn is_degraded(&self) -> bool {
        !(self.tier1 && self.tier2)
    }
}

/// TTLs resolved for one fetch
#[derive(Debug, Clone, Copy)]
struct ResolvedTtl {
    tier1: Duration,
    tier2: Option<Duration>,
}

// =============================================================================
// Cache Orchestrator
// =============================================================================

/// Coordinates both cache tiers and the compute fallback
pub struct CacheOrchestrator {
    fast: Arc<dyn FastCache>,
    persisted: Arc<dyn PersistedCache>,
    flights: SingleFlight<CacheRecord>,
    /// Generation of each owner's latest invalidation (absent = none retained)
    epochs: DashMap<u64, u64>,
    /// Source of invalidation generations, never reused
    generation: AtomicU64,
    /// Generations at or below this were last seen by a sweep
    swept_through: AtomicU64,
    /// Epoch reported for owners without a retained entry
    epoch_floor: AtomicU64,
    stats: Arc<StatsCollector>,
    settings: OrchestratorSettings,
    event_tx: broadcast::Sender<CacheEvent>,
    shutdown: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl CacheOrchestrator {
    pub fn new(
        fast: Arc<dyn FastCache>,
        persisted: Arc<dyn PersistedCache>,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(settings.event_channel_capacity.max(1));

        info!(
            tier1 = fast.name(),
            tier2 = persisted.name(),
            compute_timeout = ?settings.compute_timeout,
            namespaces = settings.namespaces.len(),
            "Cache orchestrator initialized"
        );

        Arc::new(Self {
            fast,
            persisted,
            flights: SingleFlight::new(),
            epochs: DashMap::new(),
            generation: AtomicU64::new(0),
            swept_through: AtomicU64::new(0),
            epoch_floor: AtomicU64::new(0),
            stats: Arc::new(StatsCollector::with_owner_limit(settings.max_tracked_owners)),
            settings,
            event_tx,
            shutdown: CancellationToken::new(),
            maintenance: Mutex::new(None),
        })
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit_event(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub(crate) fn fast(&self) -> &dyn FastCache {
        self.fast.as_ref()
    }

    pub(crate) fn persisted(&self) -> &dyn PersistedCache {
        self.persisted.as_ref()
    }

    fn owner_epoch(&self, owner_id: u64) -> u64 {
        self.epochs
            .get(&owner_id)
            .map(|epoch| *epoch)
            .unwrap_or_else(|| self.epoch_floor.load(Ordering::SeqCst))
    }

    /// Mark every computation in flight for `owner_id` as stale
    pub(crate) fn bump_epoch(&self, owner_id: u64) {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.epochs.insert(owner_id, next);
    }

    /// Forget invalidations that predate the previous sweep
    ///
    /// Forgotten owners read as the floor, which is raised before any entry
    /// goes away. An owner's epoch therefore never moves back, and a
    /// computation that straddles a forgotten invalidation is still never
    /// stored.
    pub(crate) fn prune_epochs(&self) -> usize {
        let horizon = self
            .swept_through
            .swap(self.generation.load(Ordering::SeqCst), Ordering::SeqCst);

        let newest_forgotten = self
            .epochs
            .iter()
            .map(|entry| *entry.value())
            .filter(|generation| *generation <= horizon)
            .max();
        let Some(newest_forgotten) = newest_forgotten else {
            return 0;
        };
        self.epoch_floor.fetch_max(newest_forgotten, Ordering::SeqCst);

        let before = self.epochs.len();
        self.epochs.retain(|_, generation| *generation > horizon);
        before.saturating_sub(self.epochs.len())
    }

    /// Owners with a retained invalidation epoch
    pub fn tracked_epochs(&self) -> usize {
        self.epochs.len()
    }

    /// Log, count and publish a store failure that the caller never sees
    pub(crate) fn absorb(&self, tier: CacheTier, operation: &str, err: &Error) {
        warn!(tier = %tier, operation = operation, error = %err, "Cache store operation failed");
        self.stats.record_store_error(tier);
        self.emit_event(CacheEvent::store_error(tier, operation, err));
    }

    fn resolve_ttl(&self, namespace: &str, opts: &FetchOptions) -> ResolvedTtl {
        let policy = self.settings.policy_for(namespace);
        ResolvedTtl {
            tier1: opts.tier1_ttl.unwrap_or_else(|| policy.tier1_ttl()),
            tier2: opts.tier2_ttl.or_else(|| policy.tier2_ttl()),
        }
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Get the cached value for `(namespace, owner_id, params)`, computing it
    /// on a miss
    ///
    /// Only computation failures reach the caller; a failure is never cached,
    /// so the next fetch computes again.
    pub async fn fetch<T, F, Fut>(
        &self,
        namespace: &str,
        owner_id: u64,
        params: &Params,
        opts: FetchOptions,
        compute: F,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, ComputeError>>,
    {
        let key = CacheKey::build(namespace, owner_id, params)?;
        let ttl = self.resolve_ttl(namespace, &opts);

        if opts.bypass_cache {
            for tier in CacheTier::lookup_order() {
                self.stats.record_miss(owner_id, *tier);
            }
            debug!(key = %key, "Cache bypassed");
            self.emit_event(CacheEvent::miss(&key, true));
        } else {
            if let Some(hit) = self.lookup(&key, ttl).await {
                return Ok(hit);
            }
            self.emit_event(CacheEvent::miss(&key, false));
        }

        let timeout = opts.compute_timeout.or(self.settings.compute_timeout);
        let record = self.compute_and_store(&key, ttl, timeout, compute).await?;

        Ok(Fetched {
            value: record.decode()?,
            tier: TierServed::Fresh,
            computed_at: record.computed_at,
        })
    }

    /// Fetch the result of `request`, computing it with `engine` on a miss
    pub async fn fetch_request<E>(
        &self,
        engine: &E,
        request: &E::Request,
        opts: FetchOptions,
    ) -> Result<Fetched<E::Output>>
    where
        E: ComputeEngine,
    {
        let params = request.params();
        self.fetch(request.namespace(), request.owner_id(), &params, opts, || {
            engine.compute(request)
        })
        .await
    }

    /// Tier 1 then Tier 2; a Tier 2 hit refills Tier 1
    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey, ttl: ResolvedTtl) -> Option<Fetched<T>> {
        let owner_id = key.owner_id;
        let epoch = self.owner_epoch(owner_id);

        match self.fast.get(key).await {
            Ok(Some(bytes)) => {
                let decoded = CacheRecord::from_bytes(&bytes)
                    .and_then(|record| Ok((record.decode::<T>()?, record)));
                match decoded {
                    Ok((value, record)) if !record.is_expired() => {
                        self.stats.record_hit(owner_id, CacheTier::Fast);
                        debug!(key = %key, tier = %CacheTier::Fast, "Cache hit");
                        self.emit_event(CacheEvent::hit(key, CacheTier::Fast));
                        return Some(Fetched {
                            value,
                            tier: TierServed::Tier1,
                            computed_at: record.computed_at,
                        });
                    }
                    Ok(_) => {
                        if let Err(e) = self.fast.delete(key).await {
                            self.absorb(CacheTier::Fast, "delete", &e);
                        }
                    }
                    Err(e) => {
                        warn!(key = %key, tier = %CacheTier::Fast, error = %e, "Discarding undecodable cache entry");
                        if let Err(e) = self.fast.delete(key).await {
                            self.absorb(CacheTier::Fast, "delete", &e);
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => self.absorb(CacheTier::Fast, "get", &e),
        }
        self.stats.record_miss(owner_id, CacheTier::Fast);

        match self.persisted.get(key).await {
            Ok(Some(record)) => match record.decode::<T>() {
                Ok(value) => {
                    self.stats.record_hit(owner_id, CacheTier::Persisted);
                    debug!(key = %key, tier = %CacheTier::Persisted, "Cache hit");
                    self.emit_event(CacheEvent::hit(key, CacheTier::Persisted));
                    self.backfill(&record, ttl.tier1, epoch).await;
                    return Some(Fetched {
                        value,
                        tier: TierServed::Tier2,
                        computed_at: record.computed_at,
                    });
                }
                Err(e) => {
                    warn!(key = %key, tier = %CacheTier::Persisted, error = %e, "Discarding undecodable cache entry");
                    if let Err(e) = self.persisted.delete(key).await {
                        self.absorb(CacheTier::Persisted, "delete", &e);
                    }
                }
            },
            Ok(None) => {}
            Err(e) => self.absorb(CacheTier::Persisted, "get", &e),
        }
        self.stats.record_miss(owner_id, CacheTier::Persisted);

        None
    }

    /// Write a Tier 2 record into Tier 1, never outliving the Tier 2 copy
    ///
    /// Skipped (or undone) when the owner was invalidated after the Tier 2
    /// read, so a pre-invalidation record cannot land back in Tier 1.
    async fn backfill(&self, record: &CacheRecord, tier1_ttl: Duration, epoch: u64) {
        let owner_id = record.key.owner_id;
        if self.owner_epoch(owner_id) != epoch || !self.write_fast(record, tier1_ttl).await {
            return;
        }

        if self.owner_epoch(owner_id) != epoch {
            if let Err(e) = self.fast.delete(&record.key).await {
                self.absorb(CacheTier::Fast, "delete", &e);
            }
            return;
        }

        self.emit_event(CacheEvent::Backfill {
            key: record.key.to_storage_key(),
        });
    }

    async fn write_fast(&self, record: &CacheRecord, tier1_ttl: Duration) -> bool {
        let fast_record = record.with_ttl(tier1_ttl);
        let ttl = fast_record.remaining_ttl().unwrap_or(tier1_ttl);
        if ttl.is_zero() {
            return false;
        }

        let bytes = match fast_record.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.absorb(CacheTier::Fast, "encode", &e);
                return false;
            }
        };

        match self.fast.set(&record.key, bytes, ttl).await {
            Ok(()) => true,
            Err(e) => {
                self.absorb(CacheTier::Fast, "set", &e);
                false
            }
        }
    }

    /// Store durable tier first so a crash between writes keeps a copy
    async fn write_through(&self, record: &CacheRecord, tier1_ttl: Duration) {
        for tier in CacheTier::write_order() {
            match tier {
                CacheTier::Persisted => {
                    if let Err(e) = self.persisted.put(record.clone()).await {
                        self.absorb(CacheTier::Persisted, "put", &e);
                    }
                }
                CacheTier::Fast => {
                    self.write_fast(record, tier1_ttl).await;
                }
            }
        }
    }

    async fn discard(&self, key: &CacheKey) {
        if let Err(e) = self.persisted.delete(key).await {
            self.absorb(CacheTier::Persisted, "delete", &e);
        }
        if let Err(e) = self.fast.delete(key).await {
            self.absorb(CacheTier::Fast, "delete", &e);
        }
    }

    /// Run `compute` once per key across concurrent callers and cache the result
    async fn compute_and_store<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: ResolvedTtl,
        timeout: Option<Duration>,
        compute: F,
    ) -> Result<CacheRecord>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, ComputeError>>,
    {
        let owner_id = key.owner_id;
        // Requests after an invalidation never join a flight started before it
        let epoch = self.owner_epoch(owner_id);
        let flight_key = format!("{}@{}", key.to_storage_key(), epoch);

        let work = move || async move {
            self.stats.record_computation(owner_id);
            let started = Instant::now();

            let value = compute().await?;
            let record = CacheRecord::from_value(key.clone(), &value, ttl.tier2).map_err(|e| {
                error!(key = %key, error = %e, "Computed value could not be serialized");
                ComputeError::InvalidOutput(e.to_string())
            })?;

            // An invalidation during the computation means the inputs it read
            // may already be stale: hand the result back without caching it.
            let mut stored = false;
            if self.owner_epoch(owner_id) == epoch {
                self.write_through(&record, ttl.tier1).await;
                stored = self.owner_epoch(owner_id) == epoch;
                if !stored {
                    self.discard(key).await;
                }
            }

            let duration_ms = started.elapsed().as_millis() as u64;
            if stored {
                info!(key = %key, duration_ms = duration_ms, "Computed and cached");
            } else {
                info!(key = %key, duration_ms = duration_ms, "Owner invalidated during computation, result not cached");
            }
            self.emit_event(CacheEvent::Computed {
                key: key.to_storage_key(),
                duration_ms,
                stored,
            });

            Ok::<_, ComputeError>(record)
        };

        let (outcome, role) = self.flights.resolve(&flight_key, timeout, work).await;

        if !role.is_leader() {
            self.stats.record_coalesced(owner_id);
        }

        outcome.map_err(|e| {
            if role.is_leader() {
                warn!(key = %key, error = %e, "Computation failed");
                self.stats.record_compute_failure(&e);
                self.emit_event(CacheEvent::ComputeFailed {
                    key: key.to_storage_key(),
                    error: e.to_string(),
                });
            }
            Error::Compute(e)
        })
    }

    // =========================================================================
    // Statistics & Health
    // =========================================================================

    /// Counter snapshot plus the Tier 1 key estimate
    pub async fn statistics(&self) -> CacheStatistics {
        let mut snapshot = self.stats.snapshot();
        snapshot.total_keys = match self.fast.stats().await {
            Ok(stats) => Some(stats.total_keys),
            Err(e) => {
                debug!(error = %e, "Tier 1 key count unavailable");
                None
            }
        };
        snapshot
    }

    pub fn owner_statistics(&self, owner_id: u64) -> Option<OwnerStatistics> {
        self.stats.owner_snapshot(owner_id)
    }

    pub async fn health(&self) -> CacheHealth {
        let (tier1, tier2) = tokio::join!(self.fast.health_check(), self.persisted.health_check());
        CacheHealth {
            tier1: tier1.unwrap_or(false),
            tier2: tier2.unwrap_or(false),
            in_flight: self.flights.in_flight(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Remove expired Tier 2 records now
    pub async fn purge_expired(&self) -> u64 {
        match self.persisted.purge_expired().await {
            Ok(purged) => {
                if purged > 0 {
                    info!(purged = purged, "Purged expired tier 2 records");
                }
                purged
            }
            Err(e) => {
                self.absorb(CacheTier::Persisted, "purge_expired", &e);
                0
            }
        }
    }

    /// Start the periodic Tier 2 sweeper (no-op if already running)
    pub fn spawn_maintenance(self: &Arc<Self>) {
        let mut slot = self.maintenance.lock();
        if slot.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let orchestrator = Arc::clone(self);
        let token = self.shutdown.clone();
        let period = self.settings.sweep_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        orchestrator.purge_expired().await;
                        let pruned = orchestrator.prune_epochs();
                        if pruned > 0 {
                            debug!(pruned = pruned, "Pruned invalidation epochs");
                        }
                    }
                }
            }
            debug!("Tier 2 sweeper stopped");
        }));

        info!(interval_secs = period.as_secs(), "Tier 2 sweeper started");
    }

    /// Stop background work and wait for it to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.maintenance.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Cache orchestrator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
