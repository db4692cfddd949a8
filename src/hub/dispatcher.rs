//! Notification hub workers.
//!
//! `publish` enqueues a re-evaluation request on a bounded channel and never
//! blocks the caller. A small pool of dispatch workers drains the queue; a
//! separate sweeper thread expires polls whose clients went away without
//! waiting out their deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::contract::{Contract, ContractStatus, Coordinates};
use crate::error::{MarketError, MarketResult};
use crate::filter::{FilterCriteria, FilterMatcher, PollCriteria};
use crate::id::{ContractId, SubscriptionId};
use crate::storage::ContractStore;

use super::handle::PollHandle;
use super::registry::{Registry, Waiter};

#[derive(Debug, Clone, Copy)]
struct PublishMsg {
    contract_id: ContractId,
    status: ContractStatus,
}

/// Hub counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    /// Polls currently parked.
    pub pending: usize,
    /// Polls resolved with matches.
    pub resolved: u64,
    /// Polls resolved empty at their deadline.
    pub timed_out: u64,
    /// Publishes folded into an already queued pass.
    pub coalesced_publishes: u64,
    /// Per-poll evaluations that failed (e.g. distance service errors).
    pub evaluation_failures: u64,
}

/// Long-poll notification hub.
///
/// Drivers `subscribe` with a filter and receive a [`PollHandle`]; the lifecycle
/// manager calls `publish` after every contract create/update, which schedules
/// a re-evaluation of all parked polls.
#[derive(Debug)]
pub struct NotificationHub {
    cfg: HubConfig,
    registry: Arc<Registry>,
    publish_tx: Sender<PublishMsg>,
    shutdown_tx: Sender<()>,
    coalesced: AtomicU64,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationHub {
    /// Start the hub and its worker threads.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Internal` if a worker thread cannot be spawned.
    pub fn new(
        cfg: HubConfig,
        contracts: Arc<dyn ContractStore>,
        matcher: FilterMatcher,
    ) -> MarketResult<Self> {
        let registry = Arc::new(Registry::new(contracts, matcher));
        let (publish_tx, publish_rx) = bounded::<PublishMsg>(cfg.publish_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let workers = cfg.dispatch_workers.max(1);
        let mut threads = Vec::with_capacity(workers + 1);
        for idx in 0..workers {
            let rx = publish_rx.clone();
            let registry = Arc::clone(&registry);
            let handle = thread::Builder::new()
                .name(format!("moveboard-hub-{idx}"))
                .spawn(move || dispatch_loop(&registry, &rx))
                .map_err(|e| MarketError::internal(format!("failed to spawn hub worker: {e}")))?;
            threads.push(handle);
        }

        let sweeper_registry = Arc::clone(&registry);
        let sweep_interval = cfg.sweep_interval;
        let sweeper = thread::Builder::new()
            .name("moveboard-hub-sweeper".to_string())
            .spawn(move || loop {
                let stop = select! {
                    recv(shutdown_rx) -> _ => true,
                    default(sweep_interval) => {
                        let expired = sweeper_registry.expire_due(Instant::now());
                        if expired > 0 {
                            debug!(expired, "expired abandoned polls");
                        }
                        false
                    }
                };
                if stop {
                    break;
                }
            })
            .map_err(|e| MarketError::internal(format!("failed to spawn hub sweeper: {e}")))?;
        threads.push(sweeper);

        info!(
            workers,
            poll_timeout_ms = cfg.poll_timeout.as_millis() as u64,
            "notification hub started"
        );

        Ok(Self {
            cfg,
            registry,
            publish_tx,
            shutdown_tx,
            coalesced: AtomicU64::new(0),
            threads: Mutex::new(threads),
        })
    }

    /// Park a poll for `filter` issued from `origin`.
    ///
    /// If open contracts already match, the returned handle is resolved
    /// immediately with the full list. Otherwise it resolves on the first
    /// publish that produces a match, or empty at the poll timeout.
    ///
    /// # Errors
    ///
    /// - `Validation`: bad coordinates or negative caps
    /// - `Upstream`: the distance service failed during the initial evaluation
    pub fn subscribe(
        &self,
        origin: Option<Coordinates>,
        filter: FilterCriteria,
    ) -> MarketResult<PollHandle> {
        let criteria = PollCriteria::new(origin, filter);
        criteria.validate()?;
        let criteria = Arc::new(criteria);

        let id = SubscriptionId::new();
        let (tx, rx) = bounded::<Vec<Contract>>(1);
        let now = Instant::now();
        let deadline = now + self.cfg.poll_timeout;

        // Park before the first evaluation so a publish racing with this call
        // cannot slip between the check and the insert.
        self.registry.park(
            id,
            Waiter {
                criteria: Arc::clone(&criteria),
                tx,
                created_at: now,
                deadline,
            },
        );
        let handle = PollHandle::new(id, rx, deadline, Arc::clone(&self.registry));

        let found = self.registry.evaluate(&criteria)?;
        if found.is_empty() {
            debug!(subscription = %id, "poll parked");
        } else {
            self.registry.resolve(id, found);
        }
        Ok(handle)
    }

    /// Schedule a re-evaluation of every parked poll after `changed` was written.
    ///
    /// Never blocks. When the queue is full the publish is dropped: every queued
    /// pass reads the store when it runs, so it already covers this change.
    pub fn publish(&self, changed: &Contract) {
        let msg = PublishMsg {
            contract_id: changed.id,
            status: changed.status,
        };
        match self.publish_tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(contract = %changed.id, "publish coalesced into queued pass");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(contract = %changed.id, "publish after hub shutdown");
            }
        }
    }

    /// Run a re-evaluation pass on the calling thread. Returns polls woken.
    pub fn reevaluate_now(&self) -> usize {
        self.registry.reevaluate_all()
    }

    /// Expire every poll past its deadline on the calling thread.
    pub fn expire_now(&self) -> usize {
        self.registry.expire_due(Instant::now())
    }

    /// Polls currently parked.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    /// Snapshot of the hub counters.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            pending: self.registry.pending_count(),
            resolved: self.registry.resolved_count(),
            timed_out: self.registry.timed_out_count(),
            coalesced_publishes: self.coalesced.load(Ordering::Relaxed),
            evaluation_failures: self.registry.evaluation_failures(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.cfg
    }

    #[cfg(test)]
    pub(crate) fn registry_for_tests(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        // Disconnect both channels so every worker leaves its loop, then join.
        let (dummy_publish_tx, _) = bounded::<PublishMsg>(1);
        drop(std::mem::replace(&mut self.publish_tx, dummy_publish_tx));
        let (dummy_shutdown_tx, _) = bounded::<()>(1);
        drop(std::mem::replace(&mut self.shutdown_tx, dummy_shutdown_tx));

        let threads = match self.threads.get_mut() {
            Ok(threads) => std::mem::take(threads),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for handle in threads {
            let _ = handle.join();
        }
    }
}

fn dispatch_loop(registry: &Registry, rx: &Receiver<PublishMsg>) {
    while let Ok(msg) = rx.recv() {
        let woken = registry.reevaluate_all();
        if woken > 0 {
            info!(
                contract = %msg.contract_id,
                status = %msg.status,
                woken,
                "contract change woke parked polls"
            );
        }
    }
}
