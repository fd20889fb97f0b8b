//! Filter configuration.
//!
//! Every field has a default suitable for a small multirotor with a
//! forward-looking camera. Configuration files are not read here; the
//! struct derives `serde` traits so callers can load it from whatever
//! format they use.

use nalgebra::{SVector, Vector2, Vector3, Vector4, Vector6};
use serde::{Deserialize, Serialize};

use crate::ekf::layout::{CoreBlock, CORE_ERROR_DIM, CORE_STATE_DIM};
use crate::error::FilterError;
use crate::geometry::CameraIntrinsics;

/// Per-block vector over the core error state.
pub type CoreErrorVector = SVector<f64, CORE_ERROR_DIM>;

/// Core nominal state `[p, v, q(wxyz), b_a, b_g, μ]`.
pub type CoreStateVector = SVector<f64, CORE_STATE_DIM>;

/// Measurement noise variances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementNoise {
    /// Bearing tangent-plane variance (rad²), per axis.
    pub feature: f64,
    /// Pixel variance (px²), per axis.
    pub pixel: f64,
    /// Depth variance (m²).
    pub depth: f64,
    /// Drag accelerometer variance ((m/s²)²), per axis.
    pub accel: f64,
    /// Attitude variance (rad²), per axis.
    pub attitude: f64,
    /// Position variance (m²), per axis.
    pub position: f64,
    /// Velocity variance ((m/s)²), per axis.
    pub velocity: f64,
    /// Altitude variance (m²).
    pub altitude: f64,
}

impl Default for MeasurementNoise {
    fn default() -> Self {
        Self {
            feature: 2.5e-5,
            pixel: 4.0,
            depth: 0.1,
            accel: 0.1,
            attitude: 1e-3,
            position: 1e-4,
            velocity: 1e-3,
            altitude: 1e-3,
        }
    }
}

/// Configuration for [`crate::ekf::ViEkf`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkfConfig {
    /// Initial core state.
    pub x0: CoreStateVector,
    /// Initial core covariance diagonal.
    pub p0: CoreErrorVector,
    /// Core process noise spectral density (per second).
    pub qx: CoreErrorVector,
    /// Partial-update weights for the core error state, each in `[0, 1]`.
    pub lambda: CoreErrorVector,
    /// Initial feature covariance diagonal `[bearing x, bearing y, inverse depth]`.
    pub p0_feat: Vector3<f64>,
    /// Feature process noise spectral density.
    pub qx_feat: Vector3<f64>,
    /// Partial-update weights for each feature block.
    pub lambda_feat: Vector3<f64>,
    /// IMU input noise variances `[accel (3), gyro (3)]`.
    pub qu: Vector6<f64>,
    /// Minimum expected feature depth (m); resets go to `1 / (2 min_depth)`.
    pub min_depth: f64,
    /// Maximum number of simultaneously tracked features.
    pub max_features: usize,
    /// Camera-to-body rotation, scalar first.
    pub q_b_c: Vector4<f64>,
    /// Camera position in the body frame (m).
    pub p_b_c: Vector3<f64>,
    /// Focal lengths `[fx, fy]` (px).
    pub focal_len: Vector2<f64>,
    /// Principal point `[cx, cy]` (px).
    pub cam_center: Vector2<f64>,
    /// Replace horizontal specific force with the linear drag model.
    pub use_drag_term: bool,
    /// Weight corrections with `lambda` / `lambda_feat`.
    pub partial_update: bool,
    /// Allow keyframe resets.
    pub keyframe_reset: bool,
    /// Reset once fewer than this fraction of keyframe features remain tracked.
    pub keyframe_overlap: f64,
    pub noise: MeasurementNoise,
}

impl Default for EkfConfig {
    #[rustfmt::skip]
    fn default() -> Self {
        let mut x0 = CoreStateVector::zeros();
        x0[CoreBlock::Attitude.state().offset] = 1.0;
        x0[CoreBlock::Drag.state().offset] = 0.2;

        Self {
            x0,
            p0: CoreErrorVector::from_column_slice(&[
                1e-8, 1e-8, 1e-8,
                1e-2, 1e-2, 1e-2,
                1e-3, 1e-3, 1e-3,
                1e-2, 1e-2, 1e-2,
                1e-4, 1e-4, 1e-4,
                1e-2,
            ]),
            qx: CoreErrorVector::from_column_slice(&[
                1e-6, 1e-6, 1e-6,
                1e-4, 1e-4, 1e-4,
                1e-6, 1e-6, 1e-6,
                1e-6, 1e-6, 1e-6,
                1e-7, 1e-7, 1e-7,
                1e-6,
            ]),
            lambda: CoreErrorVector::repeat(1.0),
            p0_feat: Vector3::new(1e-2, 1e-2, 0.1),
            qx_feat: Vector3::new(1e-6, 1e-6, 1e-5),
            lambda_feat: Vector3::repeat(1.0),
            qu: Vector6::new(2.5e-3, 2.5e-3, 2.5e-3, 1e-4, 1e-4, 1e-4),
            min_depth: 0.2,
            max_features: 25,
            // Camera z (optical axis) along body x, camera x along body y.
            q_b_c: Vector4::new(0.5, 0.5, 0.5, 0.5),
            p_b_c: Vector3::zeros(),
            focal_len: Vector2::new(410.0, 410.0),
            cam_center: Vector2::new(320.0, 240.0),
            use_drag_term: false,
            partial_update: false,
            keyframe_reset: true,
            keyframe_overlap: 0.8,
            noise: MeasurementNoise::default(),
        }
    }
}

impl EkfConfig {
    /// Inverse depth every reset returns a feature to.
    pub fn default_inverse_depth(&self) -> f64 {
        1.0 / (2.0 * self.min_depth)
    }

    pub fn camera(&self) -> CameraIntrinsics {
        CameraIntrinsics::new(self.focal_len, self.cam_center)
    }

    /// Check ranges that the filter relies on.
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(self.min_depth.is_finite() && self.min_depth > 0.0) {
            return Err(FilterError::InvalidConfig(format!(
                "min_depth must be positive, got {}",
                self.min_depth
            )));
        }
        if self.max_features == 0 {
            return Err(FilterError::InvalidConfig(
                "max_features must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.keyframe_overlap) {
            return Err(FilterError::InvalidConfig(format!(
                "keyframe_overlap must lie in [0, 1], got {}",
                self.keyframe_overlap
            )));
        }
        let mut variances = self
            .p0
            .iter()
            .chain(self.qx.iter())
            .chain(self.p0_feat.iter())
            .chain(self.qx_feat.iter())
            .chain(self.qu.iter());
        if variances.any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(FilterError::InvalidConfig(
                "variances must be finite and non-negative".to_string(),
            ));
        }
        if self
            .lambda
            .iter()
            .chain(self.lambda_feat.iter())
            .any(|l| !(0.0..=1.0).contains(l))
        {
            return Err(FilterError::InvalidConfig(
                "partial-update weights must lie in [0, 1]".to_string(),
            ));
        }
        let n = &self.noise;
        let noise = [
            n.feature, n.pixel, n.depth, n.accel, n.attitude, n.position, n.velocity, n.altitude,
        ];
        if noise.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return Err(FilterError::InvalidConfig(
                "measurement noise variances must be positive".to_string(),
            ));
        }
        if self.focal_len.iter().any(|f| !(f.is_finite() && *f > 0.0))
            || self.cam_center.iter().any(|c| !c.is_finite())
        {
            return Err(FilterError::InvalidConfig(format!(
                "invalid camera intrinsics: focal_len {:?}, cam_center {:?}",
                self.focal_len, self.cam_center
            )));
        }
        if self.q_b_c.norm() < 1e-9 {
            return Err(FilterError::InvalidConfig(
                "q_b_c must be a non-zero quaternion".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_is_valid() {
        assert!(EkfConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_inverse_depth() {
        let config = EkfConfig {
            min_depth: 0.1,
            ..EkfConfig::default()
        };
        assert_relative_eq!(config.default_inverse_depth(), 5.0);
    }

    #[test]
    fn test_rejects_non_positive_min_depth() {
        let config = EkfConfig {
            min_depth: 0.0,
            ..EkfConfig::default()
        };
        assert!(matches!(config.validate(), Err(FilterError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_out_of_range_lambda() {
        let mut config = EkfConfig::default();
        config.lambda_feat[2] = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_variance() {
        let mut config = EkfConfig::default();
        config.qu[4] = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_focal_length() {
        let config = EkfConfig {
            focal_len: Vector2::new(410.0, 0.0),
            ..EkfConfig::default()
        };
        assert!(matches!(config.validate(), Err(FilterError::InvalidConfig(_))));
    }
}
