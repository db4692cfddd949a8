//! Storage layer for moveboard.
//!
//! Traits describe what the core needs from persistence; `memory` provides the
//! thread-safe in-memory backend used for embedding and tests.

mod memory;
mod traits;

pub use memory::{InMemoryAccountStore, InMemoryContractStore, InMemoryOfferStore, InMemoryStores};
pub use traits::{AccountStore, ContractStore, OfferStore, StorageError};
