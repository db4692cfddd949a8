//! Distance service seam.

use std::fmt;

use crate::error::UpstreamError;

/// Computes the distance between two coordinate pairs.
///
/// Production deployments back this with a routing or geocoding provider;
/// failures surface as `UpstreamError` and must never be read as "no match".
pub trait DistanceService: Send + Sync + fmt::Debug {
    /// Distance in kilometres from (`lat1`, `lng1`) to (`lat2`, `lng2`).
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError::Distance` when the provider cannot answer.
    fn distance_km(&self, lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> Result<f64, UpstreamError>;
}

/// Great-circle distance on a spherical earth.
#[derive(Debug, Default, Clone, Copy)]
pub struct HaversineDistance;

impl HaversineDistance {
    /// Mean earth radius in kilometres.
    pub const EARTH_RADIUS_KM: f64 = 6371.0;
}

impl DistanceService for HaversineDistance {
    fn distance_km(&self, lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> Result<f64, UpstreamError> {
        let d_lat = (lat2 - lat1).to_radians();
        let d_lng = (lng2 - lng1).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        let km = 2.0 * Self::EARTH_RADIUS_KM * a.sqrt().clamp(0.0, 1.0).asin();

        if km.is_finite() {
            Ok(km)
        } else {
            Err(UpstreamError::Distance {
                message: format!("non-finite distance for ({lat1}, {lng1}) -> ({lat2}, {lng2})"),
            })
        }
    }
}
