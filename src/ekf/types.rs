//! Identifier types for tracked features.

use serde::{Deserialize, Serialize};

/// Global identifier of a feature track, assigned by the external tracker.
///
/// Stable across frames until the tracker reports the track lost. The filter
/// maps it to a dense local slot through the feature registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(pub u64);

impl FeatureId {
    /// Create a new FeatureId with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

impl From<u64> for FeatureId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
