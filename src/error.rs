//! Error types for moveboard.
//!
//! Errors are split by what the caller can do about them: fix the input
//! (`ValidationError`), pick another target (`NotFoundError`), respect the
//! contract state machine (`ConflictError`) or retry later (`UpstreamError`).

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::contract::ContractStatus;
use crate::id::{AccountId, ContractId, OfferId};
use crate::storage::StorageError;

/// Malformed or out-of-range input. Always recoverable by correcting the input.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' must be greater than zero (got {value})")]
    NonPositive { field: String, value: f64 },

    #[error("Field '{field}' must not be negative (got {value})")]
    Negative { field: String, value: f64 },

    #[error("Move date {move_date_time} must be in the future (now: {now})")]
    MoveDateNotInFuture {
        move_date_time: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("From and to locations must have different coordinates")]
    SameLocation,

    #[error("Coordinate ({lat}, {lng}) is out of range")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong { field: String, max_length: usize },

    #[error("Cancellation reason cannot be blank")]
    BlankCancellationReason,
}

/// A referenced record does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    /// No contract with this id.
    #[error("Contract not found: {0}")]
    Contract(ContractId),

    /// No account with this id.
    #[error("Account not found: {0}")]
    Account(AccountId),

    /// No offer with this id (or it belongs to another contract).
    #[error("Offer not found: {0}")]
    Offer(OfferId),
}

/// A contract state-machine rule was violated.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("Contract cannot move from {from} to {to}")]
    InvalidTransition {
        from: ContractStatus,
        to: ContractStatus,
    },

    #[error("Contract in status {status} can no longer be updated")]
    NotEditable { status: ContractStatus },

    #[error("Contract status cannot move backward from {from} to {to}")]
    StatusRegression {
        from: ContractStatus,
        to: ContractStatus,
    },

    #[error("Cannot {action} less than {min_hours} hours before the move date ({hours_left} hours left)")]
    TooCloseToMoveDate {
        action: String,
        hours_left: i64,
        min_hours: i64,
    },

    #[error("Contract {id} was modified concurrently")]
    ConcurrentModification { id: ContractId },

    #[error("Contract in status {status} does not accept offers")]
    NotAcceptingOffers { status: ContractStatus },

    #[error("Offer {id} is no longer pending")]
    OfferNotPending { id: OfferId },
}

/// An external collaborator failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The distance service could not compute a distance.
    #[error("Distance service failed: {message}")]
    Distance {
        /// Collaborator-supplied failure description.
        message: String,
    },
}

/// Top-level error type for moveboard.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    /// Input rejected before any state change.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Referenced record is absent.
    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// State-machine rule violated.
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// External collaborator failure.
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// The acting account is not allowed to perform the operation.
    #[error("Forbidden: {reason}")]
    Forbidden {
        /// Why the actor was refused.
        reason: String,
    },

    /// Storage backend failure unrelated to the domain rules.
    #[error("Storage error: {message}")]
    Storage {
        /// Backend-supplied failure description.
        message: String,
    },

    /// Broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl MarketError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a forbidden error.
    #[must_use]
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a state-machine conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if this is an upstream failure.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }

    /// Returns true if this is an authorization failure.
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Returns true if repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream(_) | Self::Storage { .. } => true,
            Self::Conflict(e) => matches!(e, ConflictError::ConcurrentModification { .. }),
            Self::Validation(_) | Self::NotFound(_) | Self::Forbidden { .. } | Self::Internal { .. } => {
                false
            }
        }
    }
}

impl From<StorageError> for MarketError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ContractNotFound(id) => Self::NotFound(NotFoundError::Contract(id)),
            StorageError::AccountNotFound(id) => Self::NotFound(NotFoundError::Account(id)),
            StorageError::OfferNotFound(id) => Self::NotFound(NotFoundError::Offer(id)),
            StorageError::VersionConflict { id, .. } => {
                Self::Conflict(ConflictError::ConcurrentModification { id })
            }
            other => Self::Storage {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for moveboard operations.
pub type MarketResult<T> = Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_close_message_names_the_window() {
        let err = ConflictError::TooCloseToMoveDate {
            action: "cancel a contract".to_string(),
            hours_left: 46,
            min_hours: 72,
        };
        let msg = err.to_string();
        assert!(msg.contains("72 hours"));
        assert!(msg.contains("46 hours left"));
    }

    #[test]
    fn validation_error_names_field() {
        let err = ValidationError::NonPositive {
            field: "weight".to_string(),
            value: 0.0,
        };
        assert!(err.to_string().contains("weight"));
    }

    #[test]
    fn version_conflict_maps_to_retryable_conflict() {
        let id = ContractId::new();
        let err: MarketError = StorageError::VersionConflict {
            id,
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn storage_not_found_maps_to_not_found() {
        let id = ContractId::new();
        let err: MarketError = StorageError::ContractNotFound(id).into();
        assert_eq!(err, MarketError::NotFound(NotFoundError::Contract(id)));
    }

    #[test]
    fn retryability() {
        let upstream: MarketError = UpstreamError::Distance {
            message: "timeout".to_string(),
        }
        .into();
        assert!(upstream.is_upstream());
        assert!(upstream.is_retryable());

        let validation: MarketError = ValidationError::SameLocation.into();
        assert!(validation.is_validation());
        assert!(!validation.is_retryable());

        let conflict: MarketError = ConflictError::NotEditable {
            status: ContractStatus::Canceled,
        }
        .into();
        assert!(!conflict.is_retryable());

        assert!(MarketError::forbidden("not owner").is_forbidden());
    }
}
