//! `RwLock`-guarded contract, account and offer stores kept in process memory.
//!
//! Contracts carry a status index so open-contract snapshots for the hub do not
//! scan closed jobs. Used by the simulation binary and the test suites.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::account::Account;
use crate::contract::{Contract, ContractStatus};
use crate::id::{AccountId, ContractId, OfferId};
use crate::offer::Offer;
use crate::storage::traits::{AccountStore, ContractStore, OfferStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Stable output order: oldest first, id as tiebreaker.
fn sorted(mut contracts: Vec<Contract>) -> Vec<Contract> {
    contracts.sort_by(|a, b| {
        a.creation_date_time
            .cmp(&b.creation_date_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    contracts
}

#[derive(Debug, Default)]
struct ContractState {
    by_id: HashMap<ContractId, Contract>,
    by_status: HashMap<ContractStatus, HashSet<ContractId>>,
}

impl ContractState {
    fn collect<'a>(&self, ids: impl IntoIterator<Item = &'a ContractId>) -> Vec<Contract> {
        ids.into_iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }
}

/// Thread-safe in-memory contract store with a status index.
#[derive(Debug, Default)]
pub struct InMemoryContractStore {
    state: RwLock<ContractState>,
}

impl InMemoryContractStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContractStore for InMemoryContractStore {
    fn find_by_id(&self, id: ContractId) -> Result<Option<Contract>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contract.find_by_id"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn find_all(&self) -> Result<Vec<Contract>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contract.find_all"))?;
        Ok(sorted(state.by_id.values().cloned().collect()))
    }

    fn save(&self, mut contract: Contract) -> Result<Contract, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contract.save"))?;

        let previous_status = match state.by_id.get(&contract.id) {
            None if contract.version == 0 => None,
            None => return Err(StorageError::ContractNotFound(contract.id)),
            Some(_) if contract.version == 0 => {
                return Err(StorageError::DuplicateKey(contract.id.to_string()));
            }
            Some(stored) if stored.version != contract.version => {
                return Err(StorageError::VersionConflict {
                    id: contract.id,
                    expected: contract.version,
                    actual: stored.version,
                });
            }
            Some(stored) => Some(stored.status),
        };

        if let Some(prev) = previous_status {
            if prev != contract.status {
                if let Some(ids) = state.by_status.get_mut(&prev) {
                    ids.remove(&contract.id);
                }
            }
        }
        state
            .by_status
            .entry(contract.status)
            .or_default()
            .insert(contract.id);

        contract.version += 1;
        state.by_id.insert(contract.id, contract.clone());
        Ok(contract)
    }

    fn find_by_status(&self, status: ContractStatus) -> Result<Vec<Contract>, StorageError> {
        self.find_by_statuses(&[status])
    }

    fn find_by_statuses(&self, statuses: &[ContractStatus]) -> Result<Vec<Contract>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contract.find_by_statuses"))?;
        let mut out = Vec::new();
        for status in statuses {
            if let Some(ids) = state.by_status.get(status) {
                out.extend(state.collect(ids));
            }
        }
        Ok(sorted(out))
    }

    fn find_by_requester(
        &self,
        requester_id: AccountId,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contract.find_by_requester"))?;
        Ok(sorted(
            state
                .by_id
                .values()
                .filter(|c| c.requester_id == requester_id)
                .filter(|c| status.map_or(true, |s| c.status == s))
                .cloned()
                .collect(),
        ))
    }

    fn find_by_driver(
        &self,
        driver_id: AccountId,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contract.find_by_driver"))?;
        Ok(sorted(
            state
                .by_id
                .values()
                .filter(|c| c.driver_id == Some(driver_id))
                .filter(|c| status.map_or(true, |s| c.status == s))
                .cloned()
                .collect(),
        ))
    }
}

/// Thread-safe in-memory account store.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl InMemoryAccountStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn insert(&self, account: Account) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().map_err(|_| lock_err("account.insert"))?;
        let id = account.id();
        if accounts.contains_key(&id) {
            return Err(StorageError::DuplicateKey(id.to_string()));
        }
        accounts.insert(id, account);
        Ok(())
    }

    fn get(&self, id: AccountId) -> Result<Option<Account>, StorageError> {
        let accounts = self.accounts.read().map_err(|_| lock_err("account.get"))?;
        Ok(accounts.get(&id).cloned())
    }
}

#[derive(Debug, Default)]
struct OfferState {
    by_id: HashMap<OfferId, Offer>,
    by_contract: HashMap<ContractId, Vec<OfferId>>,
}

/// Thread-safe in-memory offer store.
#[derive(Debug, Default)]
pub struct InMemoryOfferStore {
    state: RwLock<OfferState>,
}

impl InMemoryOfferStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OfferStore for InMemoryOfferStore {
    fn insert(&self, offer: Offer) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("offer.insert"))?;
        if state.by_id.contains_key(&offer.id) {
            return Err(StorageError::DuplicateKey(offer.id.to_string()));
        }
        state.by_contract.entry(offer.contract_id).or_default().push(offer.id);
        state.by_id.insert(offer.id, offer);
        Ok(())
    }

    fn get(&self, id: OfferId) -> Result<Option<Offer>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("offer.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn update(&self, offer: Offer) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("offer.update"))?;
        let Some(slot) = state.by_id.get_mut(&offer.id) else {
            return Err(StorageError::OfferNotFound(offer.id));
        };
        *slot = offer;
        Ok(())
    }

    fn find_by_contract(&self, contract_id: ContractId) -> Result<Vec<Offer>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("offer.find_by_contract"))?;
        Ok(state
            .by_contract
            .get(&contract_id)
            .map(|ids| ids.iter().filter_map(|id| state.by_id.get(id).cloned()).collect())
            .unwrap_or_default())
    }
}

/// Convenience bundle for in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Contract store.
    pub contracts: InMemoryContractStore,
    /// Account store.
    pub accounts: InMemoryAccountStore,
    /// Offer store.
    pub offers: InMemoryOfferStore,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::contract::test_support::draft;
    use crate::offer::OfferStatus;

    fn new_contract() -> Contract {
        let now = Utc::now();
        draft(AccountId::new(), now).into_contract(now).unwrap()
    }

    #[test]
    fn save_assigns_versions_and_indexes_status() {
        let store = InMemoryContractStore::new();
        let c = store.save(new_contract()).unwrap();
        assert_eq!(c.version, 1);
        assert_eq!(store.find_by_status(ContractStatus::Requested).unwrap().len(), 1);

        let mut next = c.clone();
        next.status = ContractStatus::Offered;
        let saved = store.save(next).unwrap();
        assert_eq!(saved.version, 2);
        assert!(store.find_by_status(ContractStatus::Requested).unwrap().is_empty());
        assert_eq!(store.find_by_status(ContractStatus::Offered).unwrap().len(), 1);
        assert_eq!(
            store
                .find_by_statuses(&ContractStatus::OPEN)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn stale_write_is_rejected() {
        let store = InMemoryContractStore::new();
        let c = store.save(new_contract()).unwrap();

        let mut a = c.clone();
        a.price = 10.0;
        let mut b = c;
        b.price = 20.0;

        store.save(a).unwrap();
        let err = store.save(b).unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn duplicate_insert_and_unknown_update_are_rejected() {
        let store = InMemoryContractStore::new();
        let c = new_contract();
        store.save(c.clone()).unwrap();
        assert!(matches!(store.save(c), Err(StorageError::DuplicateKey(_))));

        let mut ghost = new_contract();
        ghost.version = 4;
        assert!(matches!(store.save(ghost), Err(StorageError::ContractNotFound(_))));
    }

    #[test]
    fn requester_and_driver_queries_filter_by_status() {
        let store = InMemoryContractStore::new();
        let c = store.save(new_contract()).unwrap();
        let requester = c.requester_id;
        let driver = AccountId::new();

        let mut accepted = c;
        accepted.status = ContractStatus::Accepted;
        accepted.driver_id = Some(driver);
        store.save(accepted).unwrap();

        assert_eq!(store.find_by_requester(requester, None).unwrap().len(), 1);
        assert!(store
            .find_by_requester(requester, Some(ContractStatus::Requested))
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .find_by_driver(driver, Some(ContractStatus::Accepted))
                .unwrap()
                .len(),
            1
        );
        assert!(store.find_by_driver(AccountId::new(), None).unwrap().is_empty());
    }

    #[test]
    fn accounts_insert_get_and_reject_duplicates() {
        let store = InMemoryAccountStore::new();
        let a = Account::driver("d", "d@example.com");
        store.insert(a.clone()).unwrap();
        assert_eq!(store.get(a.id()).unwrap(), Some(a.clone()));
        assert!(matches!(store.insert(a), Err(StorageError::DuplicateKey(_))));
    }

    #[test]
    fn offers_by_contract_and_update() {
        let store = InMemoryOfferStore::new();
        let contract_id = ContractId::new();
        let o1 = Offer::new(contract_id, AccountId::new(), 100.0, Utc::now());
        let o2 = Offer::new(contract_id, AccountId::new(), 120.0, Utc::now());
        store.insert(o1.clone()).unwrap();
        store.insert(o2.clone()).unwrap();
        store.insert(Offer::new(ContractId::new(), AccountId::new(), 1.0, Utc::now())).unwrap();

        let offers = store.find_by_contract(contract_id).unwrap();
        assert_eq!(offers.iter().map(|o| o.id).collect::<Vec<_>>(), vec![o1.id, o2.id]);

        let mut rejected = o1;
        rejected.status = OfferStatus::Rejected;
        store.update(rejected).unwrap();
        assert_eq!(store.get(o2.id).unwrap().unwrap().status, OfferStatus::Pending);
        assert!(!store.get(offers[0].id).unwrap().unwrap().is_pending());

        let ghost = Offer::new(contract_id, AccountId::new(), 5.0, Utc::now());
        assert!(matches!(store.update(ghost), Err(StorageError::OfferNotFound(_))));
    }
}
