//! Driver-supplied filter criteria.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::contract::Coordinates;
use crate::error::ValidationError;

/// Constraints a driver puts on the contracts they want to see.
///
/// Every field is optional; an absent field means "no constraint". The
/// `fragile`, `cooling_required` and `ride_along` flags are inclusion-only:
/// `true` demands the contract flag, `false` accepts either value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterCriteria {
    /// Highest acceptable price.
    pub max_price: Option<f64>,
    /// Heaviest acceptable load.
    pub max_weight: Option<f64>,
    /// Box height; only used together with length and width.
    pub max_height: Option<f64>,
    /// Box length; only used together with height and width.
    pub max_length: Option<f64>,
    /// Box width; only used together with height and length.
    pub max_width: Option<f64>,
    /// Largest acceptable man-power requirement.
    pub max_required_people: Option<u32>,
    /// Only fragile loads.
    pub fragile: bool,
    /// Only loads that need cooling.
    pub cooling_required: bool,
    /// Only contracts where the requester rides along.
    pub ride_along: bool,
    /// Exact move day.
    pub move_date: Option<NaiveDate>,
    /// Maximum distance from the driver to the pickup, in kilometres.
    pub radius_km: Option<f64>,
}

impl FilterCriteria {
    /// Volume of the bounding box, if all three dimensions are capped.
    #[must_use]
    pub fn max_volume(&self) -> Option<f64> {
        match (self.max_height, self.max_length, self.max_width) {
            (Some(h), Some(l), Some(w)) => Some(h * l * w),
            _ => None,
        }
    }

    /// Reject caps that can never be meaningful.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::Negative` for a negative or non-finite cap.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("maxPrice", self.max_price),
            ("maxWeight", self.max_weight),
            ("maxHeight", self.max_height),
            ("maxLength", self.max_length),
            ("maxWidth", self.max_width),
            ("radiusKm", self.radius_km),
        ] {
            if let Some(v) = value {
                if !(v >= 0.0 && v.is_finite()) {
                    return Err(ValidationError::Negative {
                        field: field.to_string(),
                        value: v,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A filter together with the position it was issued from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollCriteria {
    /// Driver position; required for the radius rule to apply.
    pub origin: Option<Coordinates>,
    /// Constraints.
    pub filter: FilterCriteria,
}

impl PollCriteria {
    /// Bundle a position and a filter.
    #[must_use]
    pub fn new(origin: Option<Coordinates>, filter: FilterCriteria) -> Self {
        Self { origin, filter }
    }

    /// Validate both parts.
    ///
    /// # Errors
    ///
    /// Returns the first failing `ValidationError`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(origin) = &self.origin {
            origin.validate()?;
        }
        self.filter.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_volume_needs_all_three_caps() {
        let mut f = FilterCriteria {
            max_height: Some(2.0),
            max_length: Some(3.0),
            ..FilterCriteria::default()
        };
        assert_eq!(f.max_volume(), None);
        f.max_width = Some(4.0);
        assert_eq!(f.max_volume(), Some(24.0));
    }

    #[test]
    fn negative_radius_is_invalid() {
        let f = FilterCriteria {
            radius_km: Some(-1.0),
            ..FilterCriteria::default()
        };
        assert!(f.validate().is_err());
        assert!(FilterCriteria::default().validate().is_ok());
    }

    #[test]
    fn deserializes_partial_json() {
        let f: FilterCriteria =
            serde_json::from_str(r#"{"maxPrice": 200, "fragile": true, "moveDate": "2024-04-15"}"#)
                .unwrap();
        assert_eq!(f.max_price, Some(200.0));
        assert!(f.fragile);
        assert!(!f.ride_along);
        assert_eq!(f.move_date, NaiveDate::from_ymd_opt(2024, 4, 15));
    }
}
