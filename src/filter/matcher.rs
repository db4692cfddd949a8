//! Contract matching against driver filters.
//!
//! Cheap field comparisons run first; the distance service is only consulted
//! for contracts that already passed every other rule.

use std::sync::Arc;

use crate::contract::{Contract, Coordinates};
use crate::error::UpstreamError;

use super::criteria::FilterCriteria;
use super::distance::DistanceService;

/// Evaluates [`FilterCriteria`] against contracts.
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    distance: Arc<dyn DistanceService>,
}

impl FilterMatcher {
    /// Create a matcher using `distance` for radius checks.
    #[must_use]
    pub fn new(distance: Arc<dyn DistanceService>) -> Self {
        Self { distance }
    }

    /// Does `contract` satisfy every rule of `filter`?
    ///
    /// The radius rule applies only when both `filter.radius_km` and `origin`
    /// are present; it measures from `origin` to the contract's pickup point.
    ///
    /// # Errors
    ///
    /// Propagates `UpstreamError` from the distance service.
    pub fn matches(
        &self,
        contract: &Contract,
        filter: &FilterCriteria,
        origin: Option<Coordinates>,
    ) -> Result<bool, UpstreamError> {
        if !matches_attributes(contract, filter) {
            return Ok(false);
        }

        let (Some(radius), Some(origin)) = (filter.radius_km, origin) else {
            return Ok(true);
        };
        let pickup = contract.from.coordinates;
        let km = self
            .distance
            .distance_km(origin.lat, origin.lng, pickup.lat, pickup.lng)?;
        Ok(km <= radius)
    }

    /// Every contract in `candidates` that matches, in input order.
    ///
    /// # Errors
    ///
    /// Fails on the first distance-service error.
    pub fn select(
        &self,
        candidates: &[Contract],
        filter: &FilterCriteria,
        origin: Option<Coordinates>,
    ) -> Result<Vec<Contract>, UpstreamError> {
        let mut out = Vec::new();
        for c in candidates {
            if self.matches(c, filter, origin)? {
                out.push(c.clone());
            }
        }
        Ok(out)
    }
}

fn matches_attributes(contract: &Contract, filter: &FilterCriteria) -> bool {
    if filter.max_price.is_some_and(|max| contract.price > max) {
        return false;
    }
    if filter.max_weight.is_some_and(|max| contract.weight > max) {
        return false;
    }
    if filter.max_volume().is_some_and(|max| contract.volume() > max) {
        return false;
    }
    if filter
        .max_required_people
        .is_some_and(|max| contract.man_power > max)
    {
        return false;
    }

    // Inclusion-only flags.
    if filter.fragile && !contract.fragile {
        return false;
    }
    if filter.cooling_required && !contract.cooling_required {
        return false;
    }
    if filter.ride_along && !contract.ride_along {
        return false;
    }

    if let Some(day) = filter.move_date {
        if contract.move_date_time.date_naive() != day {
            return false;
        }
    }

    true
}
