//! Errors reported by the filter to its callers.
//!
//! Numerical trouble in feature depths is never an error: the depth
//! enforcer repairs it in place. Everything here is something the caller
//! has to decide about.

use crate::ekf::FeatureId;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// All feature slots are in use; the caller decides whether to evict.
    CapacityExhausted { max: usize },
    /// The feature id already owns a slot.
    DuplicateFeature(FeatureId),
    /// A measurement referenced a feature id that is not tracked.
    UnknownFeature(FeatureId),
    /// IMU samples must arrive with strictly increasing timestamps.
    NonMonotonicTimestamp { last: f64, current: f64 },
    /// The innovation covariance could not be inverted.
    SingularInnovation,
    /// A measurement value that no model can use (zero bearing, non-finite input).
    InvalidMeasurement(String),
    /// Configuration rejected by [`crate::config::EkfConfig::validate`].
    InvalidConfig(String),
    /// The estimator worker is no longer receiving inputs.
    Disconnected,
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::CapacityExhausted { max } => {
                write!(f, "feature capacity exhausted ({} slots in use)", max)
            }
            FilterError::DuplicateFeature(id) => write!(f, "feature {} is already tracked", id),
            FilterError::UnknownFeature(id) => write!(f, "feature {} is not tracked", id),
            FilterError::NonMonotonicTimestamp { last, current } => write!(
                f,
                "non-monotonic IMU timestamp: {:.6} after {:.6}",
                current, last
            ),
            FilterError::SingularInnovation => write!(f, "innovation covariance is singular"),
            FilterError::InvalidMeasurement(msg) => write!(f, "invalid measurement: {}", msg),
            FilterError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            FilterError::Disconnected => write!(f, "estimator worker disconnected"),
        }
    }
}

impl std::error::Error for FilterError {}

pub type Result<T> = std::result::Result<T, FilterError>;
