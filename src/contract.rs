//! Contracts (move jobs) and their validation rules.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::{AccountId, ContractId, OfferId};

/// Lifecycle status of a contract.
///
/// Variants are declared in lifecycle order; `ordinal` follows that order and
/// is used to reject backward moves on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    /// Posted, no offers yet.
    Requested,
    /// At least one offer received.
    Offered,
    /// An offer was accepted; a driver is assigned.
    Accepted,
    /// The move happened.
    Completed,
    /// The move was rated.
    Finalized,
    /// Canceled after acceptance.
    Canceled,
    /// Withdrawn before acceptance.
    Deleted,
}

impl ContractStatus {
    /// Statuses in which drivers can still bid.
    pub const OPEN: [Self; 2] = [Self::Requested, Self::Offered];

    /// Position in the lifecycle order.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Open for offers (and therefore visible to polling drivers).
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Requested | Self::Offered)
    }

    /// No further updates are accepted in this status.
    #[must_use]
    pub const fn is_locked(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Finalized | Self::Canceled | Self::Deleted
        )
    }

    /// Terminal status (only the rating revert leaves `Finalized`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Canceled | Self::Deleted)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Offered)
                | (Self::Requested | Self::Offered, Self::Deleted)
                | (Self::Offered, Self::Accepted)
                | (Self::Accepted, Self::Completed | Self::Canceled)
                | (Self::Completed, Self::Finalized)
                | (Self::Finalized, Self::Completed)
        )
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "REQUESTED",
            Self::Offered => "OFFERED",
            Self::Accepted => "ACCEPTED",
            Self::Completed => "COMPLETED",
            Self::Finalized => "FINALIZED",
            Self::Canceled => "CANCELED",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in [-90, 90].
    pub lat: f64,
    /// Longitude in [-180, 180].
    pub lng: f64,
}

impl Coordinates {
    /// Construct a validated coordinate pair.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCoordinate` if either component is out of range
    /// or not finite.
    pub fn new(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        let c = Self { lat, lng };
        c.validate()?;
        Ok(c)
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        let ok = self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng);
        if ok {
            Ok(())
        } else {
            Err(ValidationError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }
}

/// A pickup or drop-off place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Human readable address.
    pub address: String,
    /// Geographic position.
    pub coordinates: Coordinates,
}

impl Location {
    /// Create a location.
    #[must_use]
    pub fn new(address: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            address: address.into(),
            coordinates: Coordinates { lat, lng },
        }
    }
}

/// A move job posted by a requester.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    /// Stable identifier.
    pub id: ContractId,
    /// Optimistic concurrency version; 0 before first save.
    pub version: u64,
    pub title: String,
    pub description: String,
    pub weight: f64,
    pub height: f64,
    pub width: f64,
    pub length: f64,
    /// Number of people needed to carry the load.
    pub man_power: u32,
    pub fragile: bool,
    pub cooling_required: bool,
    /// Requester travels with the driver.
    pub ride_along: bool,
    pub price: f64,
    pub collateral: f64,
    pub move_date_time: DateTime<Utc>,
    pub creation_date_time: DateTime<Utc>,
    pub accepted_date_time: Option<DateTime<Utc>>,
    /// Owner; never changes after creation.
    pub requester_id: AccountId,
    pub driver_id: Option<AccountId>,
    pub from: Location,
    pub to: Location,
    /// Opaque references into the external file store.
    pub photos: Vec<String>,
    pub accepted_offer_id: Option<OfferId>,
    pub cancellation_reason: Option<String>,
    pub status: ContractStatus,
}

impl Contract {
    /// Load volume (height × width × length).
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.height * self.width * self.length
    }
}

/// Input for creating a contract.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDraft {
    pub requester_id: AccountId,
    pub title: String,
    pub description: String,
    pub weight: f64,
    pub height: f64,
    pub width: f64,
    pub length: f64,
    pub man_power: u32,
    #[serde(default)]
    pub fragile: bool,
    #[serde(default)]
    pub cooling_required: bool,
    #[serde(default)]
    pub ride_along: bool,
    pub price: f64,
    #[serde(default)]
    pub collateral: f64,
    pub move_date_time: DateTime<Utc>,
    pub from: Option<Location>,
    pub to: Option<Location>,
    #[serde(default)]
    pub photos: Vec<String>,
}

impl ContractDraft {
    /// Validate every field against `now`.
    ///
    /// # Errors
    ///
    /// Returns the first failing `ValidationError`.
    pub fn validate(&self, now: DateTime<Utc>, max_text_length: usize) -> Result<(), ValidationError> {
        check_text("title", &self.title, max_text_length)?;
        check_text("description", &self.description, max_text_length)?;
        check_positive("weight", self.weight)?;
        check_positive("height", self.height)?;
        check_positive("width", self.width)?;
        check_positive("length", self.length)?;
        check_positive("manPower", f64::from(self.man_power))?;
        check_positive("price", self.price)?;
        check_non_negative("collateral", self.collateral)?;
        check_future(self.move_date_time, now)?;

        let from = self.from.as_ref().ok_or_else(|| ValidationError::MissingField {
            field: "from".to_string(),
        })?;
        let to = self.to.as_ref().ok_or_else(|| ValidationError::MissingField {
            field: "to".to_string(),
        })?;
        check_route(from, to)
    }

    /// Materialize a `REQUESTED` contract. Call `validate` first.
    pub(crate) fn into_contract(self, now: DateTime<Utc>) -> Result<Contract, ValidationError> {
        let from = self.from.ok_or_else(|| ValidationError::MissingField {
            field: "from".to_string(),
        })?;
        let to = self.to.ok_or_else(|| ValidationError::MissingField {
            field: "to".to_string(),
        })?;

        Ok(Contract {
            id: ContractId::new(),
            version: 0,
            title: self.title,
            description: self.description,
            weight: self.weight,
            height: self.height,
            width: self.width,
            length: self.length,
            man_power: self.man_power,
            fragile: self.fragile,
            cooling_required: self.cooling_required,
            ride_along: self.ride_along,
            price: self.price,
            collateral: self.collateral,
            move_date_time: self.move_date_time,
            creation_date_time: now,
            accepted_date_time: None,
            requester_id: self.requester_id,
            driver_id: None,
            from,
            to,
            photos: self.photos,
            accepted_offer_id: None,
            cancellation_reason: None,
            status: ContractStatus::Requested,
        })
    }
}

/// Partial update; `None` leaves a field untouched.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContractPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub width: Option<f64>,
    pub length: Option<f64>,
    pub man_power: Option<u32>,
    pub fragile: Option<bool>,
    pub cooling_required: Option<bool>,
    pub ride_along: Option<bool>,
    pub price: Option<f64>,
    pub collateral: Option<f64>,
    pub move_date_time: Option<DateTime<Utc>>,
    pub from: Option<Location>,
    pub to: Option<Location>,
    pub photos: Option<Vec<String>>,
    pub status: Option<ContractStatus>,
}

impl ContractPatch {
    /// Validate the fields present in the patch.
    ///
    /// # Errors
    ///
    /// Returns the first failing `ValidationError`.
    pub fn validate(&self, now: DateTime<Utc>, max_text_length: usize) -> Result<(), ValidationError> {
        if let Some(t) = &self.title {
            check_text("title", t, max_text_length)?;
        }
        if let Some(d) = &self.description {
            check_text("description", d, max_text_length)?;
        }
        for (field, value) in [
            ("weight", self.weight),
            ("height", self.height),
            ("width", self.width),
            ("length", self.length),
            ("price", self.price),
        ] {
            if let Some(v) = value {
                check_positive(field, v)?;
            }
        }
        if let Some(m) = self.man_power {
            check_positive("manPower", f64::from(m))?;
        }
        if let Some(c) = self.collateral {
            check_non_negative("collateral", c)?;
        }
        if let Some(at) = self.move_date_time {
            check_future(at, now)?;
        }
        Ok(())
    }

    /// Copy the present fields onto `contract`. Status is handled by the caller.
    pub(crate) fn apply_to(self, contract: &mut Contract) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field { contract.$field = v; })*
            };
        }
        set!(
            title,
            description,
            weight,
            height,
            width,
            length,
            man_power,
            fragile,
            cooling_required,
            ride_along,
            price,
            collateral,
            move_date_time,
            from,
            to,
            photos,
        );
    }
}

/// From/to must both be valid and must not share coordinates.
pub(crate) fn check_route(from: &Location, to: &Location) -> Result<(), ValidationError> {
    from.coordinates.validate()?;
    to.coordinates.validate()?;
    if from.coordinates == to.coordinates {
        return Err(ValidationError::SameLocation);
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), ValidationError> {
    // NaN fails the comparison and is rejected as well.
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonPositive {
            field: field.to_string(),
            value,
        })
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::Negative {
            field: field.to_string(),
            value,
        })
    }
}

fn check_future(at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if at > now {
        Ok(())
    } else {
        Err(ValidationError::MoveDateNotInFuture {
            move_date_time: at,
            now,
        })
    }
}

fn check_text(field: &str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max_length {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        });
    }
    Ok(())
}
