//! Filter criteria and the pure contract matcher.

/// Filter criteria types.
pub mod criteria;
/// Distance service seam and the great-circle reference implementation.
pub mod distance;
/// Contract × filter evaluation.
pub mod matcher;

pub use criteria::{FilterCriteria, PollCriteria};
pub use distance::{DistanceService, HaversineDistance};
pub use matcher::FilterMatcher;
