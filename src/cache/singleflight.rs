//! Single-Flight Computation
//!
//! Collapses concurrent computations for the same key into one. The first
//! caller for a key becomes the leader and runs the work; callers arriving
//! while it is in flight subscribe to the leader's outcome instead of
//! computing again.

use crate::error::ComputeError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

type Outcome<V> = Option<Result<V, ComputeError>>;

/// How a caller took part in a flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Ran the work
    Leader,
    /// Waited for another caller's work
    Follower,
}

impl FlightRole {
    pub fn is_leader(&self) -> bool {
        matches!(self, FlightRole::Leader)
    }
}

/// Per-key deduplication of in-flight work
pub struct SingleFlight<V> {
    inflight: Mutex<HashMap<String, watch::Receiver<Outcome<V>>>>,
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key` unless a flight for `key` is already running
    ///
    /// Every caller of a flight receives the same outcome, success or
    /// failure. The slot is released once the leader finishes, times out, or
    /// is dropped; a dropped leader resolves its followers with
    /// [`ComputeError::Abandoned`].
    pub async fn resolve<F, Fut>(
        &self,
        key: &str,
        timeout: Option<Duration>,
        work: F,
    ) -> (Result<V, ComputeError>, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ComputeError>>,
    {
        let joined = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(rx) => Err(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.to_string(), rx);
                    Ok(tx)
                }
            }
        };

        match joined {
            Err(mut rx) => {
                tracing::trace!(key = %key, "Joining in-flight computation");
                let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
                    Ok(outcome) => (*outcome).clone().unwrap_or(Err(ComputeError::Abandoned)),
                    Err(_) => Err(ComputeError::Abandoned),
                };
                (outcome, FlightRole::Follower)
            }
            Ok(tx) => {
                let _slot = SlotGuard { flight: self, key };

                let outcome = match timeout {
                    Some(after) => match tokio::time::timeout(after, work()).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(ComputeError::TimedOut { after }),
                    },
                    None => work().await,
                };

                // Publish before the slot is released so late joiners still
                // see this outcome rather than starting a new flight.
                let _ = tx.send(Some(outcome.clone()));
                (outcome, FlightRole::Leader)
            }
        }
    }

    /// Number of keys with work in flight
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Check if work for `key` is in flight
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inflight.lock().contains_key(key)
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a flight slot when the leader finishes or is dropped
struct SlotGuard<'a, V> {
    flight: &'a SingleFlight<V>,
    key: &'a str,
}

impl<V> Drop for SlotGuard<'_, V> {
    fn drop(&mut self) {
        self.flight.inflight.lock().remove(self.key);
    }
}
