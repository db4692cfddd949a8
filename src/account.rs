//! Marketplace accounts.
//!
//! An account is either a requester (posts contracts) or a driver (makes offers
//! and performs moves). Both share the same profile fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::AccountId;

/// Fields shared by every account kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable identifier.
    pub id: AccountId,
    /// Login name.
    pub username: String,
    /// Contact e-mail.
    pub email: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Create a profile with a fresh id.
    #[must_use]
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            username: username.into(),
            email: email.into(),
            created_at: Utc::now(),
        }
    }
}

/// Discriminant of [`Account`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    /// Posts contracts.
    Requester,
    /// Bids on and performs contracts.
    Driver,
}

/// A requester or a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "accountType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Account {
    /// Account that posts contracts.
    Requester(Profile),
    /// Account that bids on contracts.
    Driver(Profile),
}

impl Account {
    /// New requester account.
    #[must_use]
    pub fn requester(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self::Requester(Profile::new(username, email))
    }

    /// New driver account.
    #[must_use]
    pub fn driver(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self::Driver(Profile::new(username, email))
    }

    /// Shared profile.
    #[must_use]
    pub const fn profile(&self) -> &Profile {
        match self {
            Self::Requester(p) | Self::Driver(p) => p,
        }
    }

    /// Account id.
    #[must_use]
    pub const fn id(&self) -> AccountId {
        self.profile().id
    }

    /// Account kind.
    #[must_use]
    pub const fn kind(&self) -> AccountKind {
        match self {
            Self::Requester(_) => AccountKind::Requester,
            Self::Driver(_) => AccountKind::Driver,
        }
    }
}
