//! Abstract storage traits for moveboard.
//!
//! The lifecycle manager and the notification hub only talk to storage through
//! these traits, so any backend (in-memory, SQL, remote) can be plugged in.

use thiserror::Error;

use crate::account::Account;
use crate::contract::{Contract, ContractStatus};
use crate::id::{AccountId, ContractId, OfferId};
use crate::offer::Offer;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Contract not found.
    #[error("Contract not found: {0}")]
    ContractNotFound(ContractId),

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Offer not found.
    #[error("Offer not found: {0}")]
    OfferNotFound(OfferId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The stored record changed since it was read.
    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Record id.
        id: ContractId,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Storage trait for contracts.
///
/// # Concurrency
/// `save` is a compare-and-swap on `Contract::version`: the write only lands if
/// the stored version still equals the version the caller read. Every read
/// returns owned snapshots taken under a single consistent view.
pub trait ContractStore: Send + Sync {
    /// Get a contract by ID.
    fn find_by_id(&self, id: ContractId) -> Result<Option<Contract>, StorageError>;

    /// All contracts.
    fn find_all(&self) -> Result<Vec<Contract>, StorageError>;

    /// Insert (version 0) or update (version must match the stored one).
    ///
    /// Returns the stored contract with its version incremented.
    ///
    /// # Errors
    /// - `VersionConflict`: the stored version differs from `contract.version`
    /// - `ContractNotFound`: a non-zero version was given for an unknown id
    /// - `DuplicateKey`: version 0 was given for an existing id
    fn save(&self, contract: Contract) -> Result<Contract, StorageError>;

    /// Contracts currently in `status`.
    fn find_by_status(&self, status: ContractStatus) -> Result<Vec<Contract>, StorageError>;

    /// Contracts currently in any of `statuses`, read under one view.
    fn find_by_statuses(&self, statuses: &[ContractStatus]) -> Result<Vec<Contract>, StorageError>;

    /// Contracts owned by a requester, optionally restricted to one status.
    fn find_by_requester(
        &self,
        requester_id: AccountId,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, StorageError>;

    /// Contracts assigned to a driver, optionally restricted to one status.
    fn find_by_driver(
        &self,
        driver_id: AccountId,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, StorageError>;
}

/// Storage trait for accounts.
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Returns error if ID already exists.
    fn insert(&self, account: Account) -> Result<(), StorageError>;

    /// Get an account by ID.
    fn get(&self, id: AccountId) -> Result<Option<Account>, StorageError>;
}

/// Storage trait for offers.
pub trait OfferStore: Send + Sync {
    /// Insert a new offer. Returns error if ID already exists.
    fn insert(&self, offer: Offer) -> Result<(), StorageError>;

    /// Get an offer by ID.
    fn get(&self, id: OfferId) -> Result<Option<Offer>, StorageError>;

    /// Replace an existing offer. Returns error if not found.
    fn update(&self, offer: Offer) -> Result<(), StorageError>;

    /// All offers made on a contract, oldest first.
    fn find_by_contract(&self, contract_id: ContractId) -> Result<Vec<Offer>, StorageError>;
}
