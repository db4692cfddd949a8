//! Contract lifecycle manager.
//!
//! Owns the contract state machine. Every status change is a read, a guard
//! check and a versioned write: if another writer got there first, the save
//! fails with a version conflict and the caller sees
//! `ConflictError::ConcurrentModification` instead of a mixed state.

mod rules;

pub mod scheduler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::config::{LifecycleConfig, MarketConfig};
use crate::contract::{check_route, Contract, ContractDraft, ContractPatch, ContractStatus, Coordinates};
use crate::error::{ConflictError, MarketError, MarketResult, NotFoundError, ValidationError};
use crate::filter::{DistanceService, FilterCriteria, FilterMatcher};
use crate::hub::{NotificationHub, PollHandle};
use crate::id::{AccountId, ContractId, OfferId};
use crate::offer::{Offer, OfferStatus};
use crate::storage::{AccountStore, ContractStore, InMemoryStores, OfferStore};
use crate::time::Clock;

use rules::{ensure_edge, ensure_notice, ensure_patch_status, is_permitted, Party};

pub use scheduler::CompletionScheduler;

/// The storage backends the manager works against.
#[derive(Clone)]
pub struct MarketStores {
    /// Contract store.
    pub contracts: Arc<dyn ContractStore>,
    /// Account store.
    pub accounts: Arc<dyn AccountStore>,
    /// Offer store.
    pub offers: Arc<dyn OfferStore>,
}

impl MarketStores {
    /// Fresh in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        InMemoryStores::new().into()
    }
}

impl From<InMemoryStores> for MarketStores {
    fn from(stores: InMemoryStores) -> Self {
        Self {
            contracts: Arc::new(stores.contracts),
            accounts: Arc::new(stores.accounts),
            offers: Arc::new(stores.offers),
        }
    }
}

/// Version races tolerated while confirming a new offer.
const OFFER_CONFIRM_ATTEMPTS: usize = 16;

/// Outcome of a guarded mutation.
enum Step {
    /// Persist the mutated contract.
    Apply,
    /// Already in the target state; nothing to write.
    Unchanged,
}

/// Contract lifecycle manager.
#[derive(Clone)]
pub struct LifecycleManager {
    contracts: Arc<dyn ContractStore>,
    accounts: Arc<dyn AccountStore>,
    offers: Arc<dyn OfferStore>,
    matcher: FilterMatcher,
    clock: Arc<dyn Clock>,
    hub: Arc<NotificationHub>,
    cfg: LifecycleConfig,
}

impl LifecycleManager {
    /// Create a manager and start its notification hub.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Internal` if the hub workers cannot be started.
    pub fn new(
        stores: MarketStores,
        distance: Arc<dyn DistanceService>,
        clock: Arc<dyn Clock>,
        config: MarketConfig,
    ) -> MarketResult<Self> {
        let matcher = FilterMatcher::new(distance);
        let hub = Arc::new(NotificationHub::new(
            config.hub,
            Arc::clone(&stores.contracts),
            matcher.clone(),
        )?);
        Ok(Self {
            contracts: stores.contracts,
            accounts: stores.accounts,
            offers: stores.offers,
            matcher,
            clock,
            hub,
            cfg: config.lifecycle,
        })
    }

    /// The notification hub fed by this manager.
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// The contract store.
    pub fn contract_store(&self) -> &Arc<dyn ContractStore> {
        &self.contracts
    }

    /// The account store.
    pub fn account_store(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    /// The clock all time rules read.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Active lifecycle settings.
    #[must_use]
    pub const fn config(&self) -> &LifecycleConfig {
        &self.cfg
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetch one contract.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is unknown.
    pub fn get(&self, id: ContractId) -> MarketResult<Contract> {
        self.contracts
            .find_by_id(id)?
            .ok_or(MarketError::NotFound(NotFoundError::Contract(id)))
    }

    /// Open contracts matching `filter` as seen from `origin`.
    ///
    /// Reads one store snapshot; no state is changed.
    ///
    /// # Errors
    ///
    /// - `Validation`: bad coordinates or negative caps
    /// - `Upstream`: the distance service failed
    pub fn list_by_criteria(
        &self,
        origin: Option<Coordinates>,
        filter: Option<&FilterCriteria>,
    ) -> MarketResult<Vec<Contract>> {
        if let Some(o) = &origin {
            o.validate()?;
        }
        let snapshot = self.contracts.find_by_statuses(&ContractStatus::OPEN)?;
        match filter {
            None => Ok(snapshot),
            Some(f) => {
                f.validate()?;
                Ok(self.matcher.select(&snapshot, f, origin)?)
            }
        }
    }

    /// Park a driver poll on the hub.
    ///
    /// # Errors
    ///
    /// See [`NotificationHub::subscribe`].
    pub fn poll(&self, origin: Option<Coordinates>, filter: FilterCriteria) -> MarketResult<PollHandle> {
        self.hub.subscribe(origin, filter)
    }

    /// Contracts posted by a requester.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn contracts_for_requester(
        &self,
        requester_id: AccountId,
        status: Option<ContractStatus>,
    ) -> MarketResult<Vec<Contract>> {
        Ok(self.contracts.find_by_requester(requester_id, status)?)
    }

    /// Contracts assigned to a driver.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn contracts_for_driver(
        &self,
        driver_id: AccountId,
        status: Option<ContractStatus>,
    ) -> MarketResult<Vec<Contract>> {
        Ok(self.contracts.find_by_driver(driver_id, status)?)
    }

    /// Offers made on a contract, oldest first.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn offers_for(&self, contract_id: ContractId) -> MarketResult<Vec<Offer>> {
        Ok(self.offers.find_by_contract(contract_id)?)
    }

    // ------------------------------------------------------------------
    // Requester / driver operations
    // ------------------------------------------------------------------

    /// Post a new contract in `REQUESTED`.
    ///
    /// # Errors
    ///
    /// - `Validation`: any field rule fails
    /// - `NotFound`: the requester does not exist
    /// - `Forbidden`: the account is a driver
    pub fn create(&self, draft: ContractDraft) -> MarketResult<Contract> {
        let now = self.clock.now();
        draft.validate(now, self.cfg.max_text_length)?;

        match self.account(draft.requester_id)? {
            Account::Requester(_) => {}
            Account::Driver(p) => {
                return Err(MarketError::forbidden(format!(
                    "driver {} cannot post contracts",
                    p.id
                )));
            }
        }

        let saved = self.contracts.save(draft.into_contract(now)?)?;
        info!(
            contract = %saved.id,
            requester = %saved.requester_id,
            move_date = %saved.move_date_time,
            "contract created"
        );
        self.hub.publish(&saved);
        Ok(saved)
    }

    /// Apply the fields present in `patch`.
    ///
    /// # Errors
    ///
    /// - `Conflict`: contract is completed/finalized/canceled/deleted, the
    ///   status would move backward, or the contract changed concurrently
    /// - `Validation`: a patched field is invalid, or from/to would coincide
    /// - `Forbidden`: `actor` is not the owner
    pub fn update(&self, id: ContractId, actor: AccountId, patch: ContractPatch) -> MarketResult<Contract> {
        let max_text_length = self.cfg.max_text_length;
        let (saved, _) = self.transition(id, "update", |c, now| {
            self.authorize(c, actor, Party::Owner, "update")?;
            if c.status.is_locked() {
                return Err(ConflictError::NotEditable { status: c.status }.into());
            }
            patch.validate(now, max_text_length)?;
            if let Some(target) = patch.status {
                ensure_patch_status(c.status, target)?;
                c.status = target;
            }
            patch.apply_to(c);
            check_route(&c.from, &c.to)?;
            Ok(Step::Apply)
        })?;
        self.hub.publish(&saved);
        Ok(saved)
    }

    /// Cancel an accepted contract.
    ///
    /// # Errors
    ///
    /// - `Conflict`: not `ACCEPTED`, or less than the notice window before the move
    /// - `Validation`: blank reason
    /// - `Forbidden`: `actor` is neither the owner nor the assigned driver
    pub fn cancel(&self, id: ContractId, actor: AccountId, reason: &str) -> MarketResult<Contract> {
        let min_hours = self.cfg.min_notice_hours;
        let (saved, _) = self.transition(id, "cancel", |c, now| {
            self.authorize(c, actor, Party::OwnerOrDriver, "cancel")?;
            if c.status != ContractStatus::Accepted {
                return Err(ConflictError::InvalidTransition {
                    from: c.status,
                    to: ContractStatus::Canceled,
                }
                .into());
            }
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(ValidationError::BlankCancellationReason.into());
            }
            ensure_notice("cancel a contract", c.move_date_time, now, min_hours)?;
            c.status = ContractStatus::Canceled;
            c.cancellation_reason = Some(reason.to_string());
            Ok(Step::Apply)
        })?;
        self.reject_outstanding_offers(id, None)?;
        Ok(saved)
    }

    /// Mark an accepted contract as carried out.
    ///
    /// # Errors
    ///
    /// - `Conflict`: not `ACCEPTED`
    /// - `Forbidden`: `actor` is neither the owner nor the assigned driver
    pub fn fulfill(&self, id: ContractId, actor: AccountId) -> MarketResult<Contract> {
        let (saved, _) = self.transition(id, "fulfill", |c, _| {
            self.authorize(c, actor, Party::OwnerOrDriver, "fulfill")?;
            if c.status != ContractStatus::Accepted {
                return Err(ConflictError::InvalidTransition {
                    from: c.status,
                    to: ContractStatus::Completed,
                }
                .into());
            }
            c.status = ContractStatus::Completed;
            Ok(Step::Apply)
        })?;
        Ok(saved)
    }

    /// Withdraw a contract that has not been accepted yet.
    ///
    /// # Errors
    ///
    /// - `Conflict`: not `REQUESTED`/`OFFERED`, or less than the notice window before the move
    /// - `Forbidden`: `actor` is not the owner
    pub fn delete(&self, id: ContractId, actor: AccountId) -> MarketResult<Contract> {
        let min_hours = self.cfg.min_notice_hours;
        let (saved, _) = self.transition(id, "delete", |c, now| {
            self.authorize(c, actor, Party::Owner, "delete")?;
            ensure_edge(c.status, ContractStatus::Deleted)?;
            ensure_notice("delete a contract", c.move_date_time, now, min_hours)?;
            c.status = ContractStatus::Deleted;
            Ok(Step::Apply)
        })?;
        self.reject_outstanding_offers(id, None)?;
        Ok(saved)
    }

    /// Place a driver's bid on an open contract.
    ///
    /// # Errors
    ///
    /// - `Validation`: non-positive price
    /// - `NotFound`: unknown contract or driver
    /// - `Forbidden`: the account is not a driver
    /// - `Conflict`: the contract no longer accepts offers
    pub fn submit_offer(&self, contract_id: ContractId, driver_id: AccountId, price: f64) -> MarketResult<Offer> {
        if !(price > 0.0 && price.is_finite()) {
            return Err(ValidationError::NonPositive {
                field: "price".to_string(),
                value: price,
            }
            .into());
        }
        self.driver(driver_id)?;

        let contract = self.get(contract_id)?;
        if !contract.status.is_open() {
            return Err(ConflictError::NotAcceptingOffers {
                status: contract.status,
            }
            .into());
        }

        // The offer is stored before the contract write. An acceptance or
        // delete that commits first either sees it in its rejection sweep or
        // makes the confirmation below fail.
        let offer = Offer::new(contract_id, driver_id, price, self.clock.now());
        self.offers.insert(offer.clone())?;

        match self.confirm_offer(contract_id) {
            Ok(_) => {
                info!(contract = %contract_id, offer = %offer.id, driver = %driver_id, price, "offer submitted");
                Ok(offer)
            }
            Err(e) => self.settle_unconfirmed_offer(offer, e),
        }
    }

    /// The owner accepts one pending offer.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown offer, or it belongs to another contract
    /// - `Conflict`: the offer is no longer pending or the contract is not `OFFERED`
    /// - `Forbidden`: `actor` is not the owner
    pub fn accept_offer(&self, contract_id: ContractId, offer_id: OfferId, actor: AccountId) -> MarketResult<Contract> {
        let offer = self
            .offers
            .get(offer_id)?
            .filter(|o| o.contract_id == contract_id)
            .ok_or(MarketError::NotFound(NotFoundError::Offer(offer_id)))?;
        if !offer.is_pending() {
            return Err(ConflictError::OfferNotPending { id: offer_id }.into());
        }

        let contract = self.get(contract_id)?;
        self.authorize(&contract, actor, Party::Owner, "accept offers on")?;
        self.mark_accepted(contract_id, offer.driver_id, offer_id)
    }

    // ------------------------------------------------------------------
    // Collaborator hooks
    // ------------------------------------------------------------------

    /// First offer arrived: `REQUESTED -> OFFERED`. No-op when already `OFFERED`.
    ///
    /// # Errors
    ///
    /// `Conflict` from any other status.
    pub fn mark_offered(&self, id: ContractId) -> MarketResult<Contract> {
        let (saved, _) = self.transition(id, "mark_offered", |c, _| {
            if c.status == ContractStatus::Offered {
                return Ok(Step::Unchanged);
            }
            ensure_edge(c.status, ContractStatus::Offered)?;
            c.status = ContractStatus::Offered;
            Ok(Step::Apply)
        })?;
        Ok(saved)
    }

    /// An offer was accepted: `OFFERED -> ACCEPTED`, assigns the driver and
    /// rejects every other pending offer on the contract.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown contract or driver
    /// - `Forbidden`: `driver_id` is not a driver
    /// - `Conflict`: contract is not `OFFERED`
    pub fn mark_accepted(&self, id: ContractId, driver_id: AccountId, offer_id: OfferId) -> MarketResult<Contract> {
        self.driver(driver_id)?;
        let (saved, _) = self.transition(id, "mark_accepted", |c, now| {
            ensure_edge(c.status, ContractStatus::Accepted)?;
            c.status = ContractStatus::Accepted;
            c.driver_id = Some(driver_id);
            c.accepted_offer_id = Some(offer_id);
            c.accepted_date_time = Some(now);
            Ok(Step::Apply)
        })?;
        self.reject_outstanding_offers(id, Some(offer_id))?;
        Ok(saved)
    }

    /// A rating was recorded: `COMPLETED -> FINALIZED`. No-op when already `FINALIZED`.
    ///
    /// # Errors
    ///
    /// `Conflict` from any other status.
    pub fn mark_finalized(&self, id: ContractId) -> MarketResult<Contract> {
        let (saved, _) = self.transition(id, "mark_finalized", |c, _| {
            if c.status == ContractStatus::Finalized {
                return Ok(Step::Unchanged);
            }
            ensure_edge(c.status, ContractStatus::Finalized)?;
            c.status = ContractStatus::Finalized;
            Ok(Step::Apply)
        })?;
        Ok(saved)
    }

    /// The rating was deleted: `FINALIZED -> COMPLETED`. No-op when already `COMPLETED`.
    ///
    /// # Errors
    ///
    /// `Conflict` from any other status.
    pub fn revert_to_completed(&self, id: ContractId) -> MarketResult<Contract> {
        let (saved, _) = self.transition(id, "revert_to_completed", |c, _| {
            if c.status == ContractStatus::Completed {
                return Ok(Step::Unchanged);
            }
            if c.status != ContractStatus::Finalized {
                return Err(ConflictError::InvalidTransition {
                    from: c.status,
                    to: ContractStatus::Completed,
                }
                .into());
            }
            c.status = ContractStatus::Completed;
            Ok(Step::Apply)
        })?;
        Ok(saved)
    }

    // ------------------------------------------------------------------
    // Clock-driven transitions
    // ------------------------------------------------------------------

    /// Complete every accepted contract whose move date has passed.
    ///
    /// Contracts that change concurrently are skipped and picked up by the next run.
    ///
    /// # Errors
    ///
    /// Storage failure while listing accepted contracts.
    pub fn complete_due(&self) -> MarketResult<Vec<ContractId>> {
        let now = self.clock.now();
        let due: Vec<ContractId> = self
            .contracts
            .find_by_status(ContractStatus::Accepted)?
            .into_iter()
            .filter(|c| c.move_date_time <= now)
            .map(|c| c.id)
            .collect();

        let mut completed = Vec::with_capacity(due.len());
        for id in due {
            let result = self.transition(id, "auto_complete", |c, now| {
                if c.status != ContractStatus::Accepted || c.move_date_time > now {
                    return Ok(Step::Unchanged);
                }
                c.status = ContractStatus::Completed;
                Ok(Step::Apply)
            });
            match result {
                Ok((_, true)) => completed.push(id),
                Ok((_, false)) => {}
                Err(MarketError::Conflict(ConflictError::ConcurrentModification { .. })) => {
                    debug!(contract = %id, "auto-complete lost a race; retrying next run");
                }
                Err(e) => warn!(contract = %id, error = %e, "auto-complete failed"),
            }
        }
        Ok(completed)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Load, guard, mutate and conditionally save one contract.
    ///
    /// Returns the resulting contract and whether it was written.
    fn transition<F>(&self, id: ContractId, action: &'static str, f: F) -> MarketResult<(Contract, bool)>
    where
        F: FnOnce(&mut Contract, DateTime<Utc>) -> MarketResult<Step>,
    {
        let mut contract = self.get(id)?;
        let from = contract.status;
        match f(&mut contract, self.clock.now())? {
            Step::Unchanged => Ok((contract, false)),
            Step::Apply => {
                let saved = self.contracts.save(contract)?;
                info!(
                    contract = %id,
                    action,
                    from = %from,
                    to = %saved.status,
                    version = saved.version,
                    "contract transition"
                );
                Ok((saved, true))
            }
        }
    }

    fn account(&self, id: AccountId) -> MarketResult<Account> {
        self.accounts
            .get(id)?
            .ok_or(MarketError::NotFound(NotFoundError::Account(id)))
    }

    fn driver(&self, id: AccountId) -> MarketResult<Account> {
        match self.account(id)? {
            driver @ Account::Driver(_) => Ok(driver),
            Account::Requester(_) => Err(MarketError::forbidden(format!("account {id} is not a driver"))),
        }
    }

    fn authorize(&self, contract: &Contract, actor: AccountId, party: Party, action: &str) -> MarketResult<()> {
        let account = self.account(actor)?;
        if is_permitted(&account, contract, party) {
            Ok(())
        } else {
            Err(MarketError::forbidden(format!(
                "account {actor} may not {action} contract {}",
                contract.id
            )))
        }
    }

    /// Bump the contract to `OFFERED` with a version-checked write, even when
    /// it is already `OFFERED`, so no acceptance can slip in unseen.
    fn confirm_offer(&self, contract_id: ContractId) -> MarketResult<Contract> {
        let mut attempt = 1;
        loop {
            let result = self.transition(contract_id, "offer_received", |c, _| {
                if !c.status.is_open() {
                    return Err(ConflictError::NotAcceptingOffers { status: c.status }.into());
                }
                c.status = ContractStatus::Offered;
                Ok(Step::Apply)
            });
            match result {
                Err(MarketError::Conflict(ConflictError::ConcurrentModification { .. }))
                    if attempt < OFFER_CONFIRM_ATTEMPTS =>
                {
                    attempt += 1;
                }
                other => return other.map(|(saved, _)| saved),
            }
        }
    }

    /// The contract refused a freshly stored offer: reject it, unless the
    /// owner already accepted exactly this offer.
    fn settle_unconfirmed_offer(&self, offer: Offer, cause: MarketError) -> MarketResult<Offer> {
        let contract = self.get(offer.contract_id)?;
        if contract.accepted_offer_id == Some(offer.id) {
            return Ok(self.offers.get(offer.id)?.unwrap_or(offer));
        }
        if let Some(mut stored) = self.offers.get(offer.id)? {
            if stored.is_pending() {
                stored.status = OfferStatus::Rejected;
                self.offers.update(stored)?;
            }
        }
        debug!(contract = %offer.contract_id, offer = %offer.id, error = %cause, "late offer rejected");
        Err(cause)
    }

    /// Settle every pending offer: `keep` becomes accepted, the rest rejected.
    fn reject_outstanding_offers(&self, contract_id: ContractId, keep: Option<OfferId>) -> MarketResult<usize> {
        let mut rejected = 0;
        for mut offer in self.offers.find_by_contract(contract_id)? {
            if !offer.is_pending() {
                continue;
            }
            if Some(offer.id) == keep {
                offer.status = OfferStatus::Accepted;
            } else {
                offer.status = OfferStatus::Rejected;
                rejected += 1;
            }
            self.offers.update(offer)?;
        }
        if rejected > 0 {
            debug!(contract = %contract_id, rejected, "outstanding offers rejected");
        }
        Ok(rejected)
    }
}
