//! Driver offers on contracts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, ContractId, OfferId};

/// State of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    /// Awaiting the requester's decision.
    Pending,
    /// Chosen by the requester.
    Accepted,
    /// Declined, superseded by another offer, or the contract went away.
    Rejected,
}

/// A driver's bid on a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    /// Stable identifier.
    pub id: OfferId,
    /// Contract the bid is for.
    pub contract_id: ContractId,
    /// Bidding driver.
    pub driver_id: AccountId,
    /// Proposed price.
    pub price: f64,
    /// Current state.
    pub status: OfferStatus,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

impl Offer {
    /// New pending offer.
    #[must_use]
    pub fn new(contract_id: ContractId, driver_id: AccountId, price: f64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: OfferId::new(),
            contract_id,
            driver_id,
            price,
            status: OfferStatus::Pending,
            created_at,
        }
    }

    /// Still awaiting a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OfferStatus::Pending
    }
}
