//! Pinhole projection between camera-frame bearings and pixels.
//!
//! ```text
//! π(ζ) = f ∘ (ζ_x / ζ_z, ζ_y / ζ_z) + c
//! ```

use nalgebra::{Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Bearings with `ζ_z` at or below this do not project.
const MIN_PROJECTION_DEPTH: f64 = 1e-6;

/// Focal lengths and principal point (pixels), no distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub focal_len: Vector2<f64>,
    pub cam_center: Vector2<f64>,
}

impl CameraIntrinsics {
    pub fn new(focal_len: Vector2<f64>, cam_center: Vector2<f64>) -> Self {
        Self {
            focal_len,
            cam_center,
        }
    }

    /// Pixel of bearing `zeta`, or `None` when it points behind the image plane.
    pub fn project(&self, zeta: &Vector3<f64>) -> Option<Vector2<f64>> {
        if zeta.z <= MIN_PROJECTION_DEPTH {
            return None;
        }
        let normalized = Vector2::new(zeta.x / zeta.z, zeta.y / zeta.z);
        Some(self.focal_len.component_mul(&normalized) + self.cam_center)
    }

    /// Unit bearing through pixel `uv`.
    pub fn unproject(&self, uv: &Vector2<f64>) -> Vector3<f64> {
        let normalized = (uv - self.cam_center).component_div(&self.focal_len);
        Vector3::new(normalized.x, normalized.y, 1.0).normalize()
    }

    /// `∂π/∂ζ`, valid wherever [`CameraIntrinsics::project`] is.
    #[rustfmt::skip]
    pub fn projection_jacobian(&self, zeta: &Vector3<f64>) -> Matrix2x3<f64> {
        let inv_z = 1.0 / zeta.z;
        let (fx, fy) = (self.focal_len.x, self.focal_len.y);
        Matrix2x3::new(
            fx * inv_z, 0.0,        -fx * zeta.x * inv_z * inv_z,
            0.0,        fy * inv_z, -fy * zeta.y * inv_z * inv_z,
        )
    }
}
