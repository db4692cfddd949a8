//! Pending-poll registry shared by the hub, its workers and every poll handle.
//!
//! A waiter leaves the registry exactly once: whoever removes it from the map
//! (publish pass, expiry sweep, handle timeout, handle drop) owns its result
//! sender. Removal is a single sharded-map operation, so two paths can never
//! both resolve the same waiter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::contract::{Contract, ContractStatus};
use crate::error::MarketResult;
use crate::filter::{FilterMatcher, PollCriteria};
use crate::id::SubscriptionId;
use crate::storage::ContractStore;

#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) criteria: Arc<PollCriteria>,
    pub(crate) tx: Sender<Vec<Contract>>,
    pub(crate) created_at: Instant,
    pub(crate) deadline: Instant,
}

pub(crate) struct Registry {
    pending: DashMap<SubscriptionId, Waiter>,
    contracts: Arc<dyn ContractStore>,
    matcher: FilterMatcher,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    evaluation_failures: AtomicU64,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("pending", &self.pending.len())
            .field("resolved", &self.resolved_count())
            .field("timed_out", &self.timed_out_count())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub(crate) fn new(contracts: Arc<dyn ContractStore>, matcher: FilterMatcher) -> Self {
        Self {
            pending: DashMap::new(),
            contracts,
            matcher,
            resolved: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            evaluation_failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn park(&self, id: SubscriptionId, waiter: Waiter) {
        self.pending.insert(id, waiter);
    }

    /// Contracts drivers may currently see.
    pub(crate) fn open_contracts(&self) -> MarketResult<Vec<Contract>> {
        Ok(self.contracts.find_by_statuses(&ContractStatus::OPEN)?)
    }

    /// Full matching list for one set of criteria against a fresh snapshot.
    pub(crate) fn evaluate(&self, criteria: &PollCriteria) -> MarketResult<Vec<Contract>> {
        let snapshot = self.open_contracts()?;
        Ok(self
            .matcher
            .select(&snapshot, &criteria.filter, criteria.origin)?)
    }

    /// Hand `contracts` to the waiter if it is still pending.
    ///
    /// Returns false when another path already took it.
    pub(crate) fn resolve(&self, id: SubscriptionId, contracts: Vec<Contract>) -> bool {
        let Some((_, waiter)) = self.pending.remove(&id) else {
            return false;
        };
        debug!(
            subscription = %id,
            matches = contracts.len(),
            waited_ms = waiter.created_at.elapsed().as_millis() as u64,
            "poll resolved"
        );
        // Capacity one and a single sender: never blocks, never full.
        let _ = waiter.tx.try_send(contracts);
        self.resolved.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Resolve the waiter with an empty list if it is still pending.
    pub(crate) fn expire(&self, id: SubscriptionId) -> bool {
        let Some((_, waiter)) = self.pending.remove(&id) else {
            return false;
        };
        debug!(
            subscription = %id,
            waited_ms = waiter.created_at.elapsed().as_millis() as u64,
            "poll timed out"
        );
        let _ = waiter.tx.try_send(Vec::new());
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drop the waiter without resolving it.
    pub(crate) fn withdraw(&self, id: SubscriptionId) -> bool {
        let removed = self.pending.remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "poll withdrawn");
        }
        removed
    }

    /// Expire every waiter whose deadline is at or before `now`.
    pub(crate) fn expire_due(&self, now: Instant) -> usize {
        let due: Vec<SubscriptionId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        due.into_iter().filter(|id| self.expire(*id)).count()
    }

    /// Re-evaluate every pending waiter against one store snapshot.
    ///
    /// A failing evaluation is logged and skipped; it does not stop the pass.
    pub(crate) fn reevaluate_all(&self) -> usize {
        // Copy out the criteria so no shard lock is held while matching.
        let waiting: Vec<(SubscriptionId, Arc<PollCriteria>)> = self
            .pending
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().criteria)))
            .collect();
        if waiting.is_empty() {
            return 0;
        }

        let snapshot = match self.open_contracts() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "re-evaluation skipped: contract snapshot failed");
                return 0;
            }
        };

        let mut woken = 0;
        for (id, criteria) in waiting {
            match self
                .matcher
                .select(&snapshot, &criteria.filter, criteria.origin)
            {
                Ok(found) if !found.is_empty() => {
                    if self.resolve(id, found) {
                        woken += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.evaluation_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(subscription = %id, error = %e, "poll evaluation failed");
                }
            }
        }
        woken
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn resolved_count(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }

    pub(crate) fn timed_out_count(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub(crate) fn evaluation_failures(&self) -> u64 {
        self.evaluation_failures.load(Ordering::Relaxed)
    }
}
