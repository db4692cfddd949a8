//! # moveboard - contract lifecycle and matching core for a moving marketplace
//!
//! Requesters post moving contracts; drivers browse them, bid, and get
//! notified when a new contract fits their filter.
//!
//! ## Core Concepts
//!
//! - **Contract**: a move job that walks a fixed state machine
//!   (`REQUESTED -> OFFERED -> ACCEPTED -> COMPLETED -> FINALIZED`, with
//!   `CANCELED` and `DELETED` exits)
//! - **LifecycleManager**: the only writer of contract status; every transition
//!   is a versioned compare-and-swap against the store
//! - **FilterMatcher**: pure predicate deciding whether a contract fits a
//!   driver's caps, flags, date and radius
//! - **NotificationHub**: long-poll hub that wakes parked driver polls when a
//!   matching contract is created or updated
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use moveboard::{
//!     Account, FilterCriteria, HaversineDistance, LifecycleManager, MarketConfig, MarketStores,
//!     SystemClock,
//! };
//!
//! let stores = MarketStores::in_memory();
//! let requester = Account::requester("rita", "rita@example.com");
//! stores.accounts.insert(requester.clone())?;
//!
//! let manager = LifecycleManager::new(
//!     stores,
//!     Arc::new(HaversineDistance),
//!     Arc::new(SystemClock),
//!     MarketConfig::default(),
//! )?;
//!
//! // A driver parks a poll; it resolves when a matching contract is posted.
//! let poll = manager.poll(None, FilterCriteria { max_price: Some(200.0), ..Default::default() })?;
//! let contract = manager.create(draft)?;
//! assert_eq!(poll.wait()[0].id, contract.id);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain types
pub mod account;
pub mod contract;
pub mod error;
pub mod id;
pub mod offer;
pub mod time;

// Storage, matching and notification
pub mod filter;
pub mod hub;
pub mod storage;

// Lifecycle and runtime wiring
pub mod config;
pub mod lifecycle;
pub mod telemetry;

pub use account::{Account, AccountKind, Profile};
pub use config::{HubConfig, LifecycleConfig, MarketConfig};
pub use contract::{Contract, ContractDraft, ContractPatch, ContractStatus, Coordinates, Location};
pub use error::{
    ConflictError, MarketError, MarketResult, NotFoundError, UpstreamError, ValidationError,
};
pub use filter::{DistanceService, FilterCriteria, FilterMatcher, HaversineDistance, PollCriteria};
pub use hub::{HubStats, NotificationHub, PollHandle};
pub use id::{AccountId, ContractId, OfferId, SubscriptionId};
pub use lifecycle::{CompletionScheduler, LifecycleManager, MarketStores};
pub use offer::{Offer, OfferStatus};
pub use storage::{
    AccountStore, ContractStore, InMemoryAccountStore, InMemoryContractStore, InMemoryOfferStore,
    InMemoryStores, OfferStore, StorageError,
};
pub use telemetry::{init_tracing, LogFormat};
pub use time::{Clock, ManualClock, SystemClock};
