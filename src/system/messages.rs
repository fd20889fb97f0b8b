//! Inputs queued to the estimator worker and the estimates it exposes.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::ekf::{CoreCovariance, FeatureId};
use crate::geometry::{CameraIntrinsics, Xform};
use crate::imu::{ImuBias, ImuSample};

pub use crate::ekf::FeatureEstimate;

/// One tracked feature in a camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureObservation {
    pub id: FeatureId,
    /// Bearing in the camera frame; need not be normalized.
    pub zeta: Vector3<f64>,
    /// Measured depth along the bearing (m), when the camera provides one.
    pub depth: Option<f64>,
    /// Tracker pixel behind `zeta`; when set the filter fuses the pixel
    /// instead of the bearing.
    #[serde(default)]
    pub pixel: Option<Vector2<f64>>,
}

impl FeatureObservation {
    /// Observation of a tracker pixel, unprojected through `camera`.
    pub fn from_pixel(
        id: FeatureId,
        uv: &Vector2<f64>,
        depth: Option<f64>,
        camera: &CameraIntrinsics,
    ) -> Self {
        Self {
            id,
            zeta: camera.unproject(uv),
            depth,
            pixel: Some(*uv),
        }
    }
}

/// All features reported by the tracker for one image.
///
/// Tracked features missing from `observations` are treated as lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub timestamp_s: f64,
    pub observations: Vec<FeatureObservation>,
}

impl FeatureFrame {
    pub fn ids(&self) -> Vec<FeatureId> {
        self.observations.iter().map(|o| o.id).collect()
    }
}

/// External pose reference (motion capture or simulation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthSample {
    pub timestamp_s: f64,
    /// Global body pose.
    pub pose: Xform,
    /// Body-frame velocity, when available.
    pub velocity: Option<Vector3<f64>>,
}

/// Work item for the estimator worker.
#[derive(Debug, Clone)]
pub enum FilterInput {
    Imu(ImuSample),
    Features(FeatureFrame),
    Truth(TruthSample),
    /// Height above the origin (m).
    Altitude { timestamp_s: f64, altitude: f64 },
    /// Force a keyframe reset regardless of feature overlap.
    KeyframeReset,
}

/// Body state published by the estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdometryEstimate {
    pub timestamp_s: f64,
    /// Global body pose.
    pub pose: Xform,
    /// Body-frame velocity.
    pub velocity: Vector3<f64>,
    pub bias: ImuBias,
    /// Covariance of the core error state.
    pub covariance: CoreCovariance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EkfConfig;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_observation_matches_projection() {
        let camera = EkfConfig::default().camera();
        let zeta = Vector3::new(-0.1, 0.25, 1.0).normalize();
        let uv = camera.project(&zeta).unwrap();

        let obs = FeatureObservation::from_pixel(FeatureId::new(9), &uv, Some(2.0), &camera);

        assert_relative_eq!(obs.zeta, zeta, epsilon = 1e-12);
        assert_eq!(obs.depth, Some(2.0));
        assert_eq!(obs.pixel, Some(uv));
    }

    #[test]
    fn test_frame_ids_keep_order() {
        let frame = FeatureFrame {
            timestamp_s: 0.0,
            observations: [3, 1]
                .iter()
                .map(|&i| FeatureObservation {
                    id: FeatureId::new(i),
                    zeta: Vector3::z(),
                    depth: None,
                    pixel: None,
                })
                .collect(),
        };

        assert_eq!(frame.ids(), vec![FeatureId::new(3), FeatureId::new(1)]);
    }
}
