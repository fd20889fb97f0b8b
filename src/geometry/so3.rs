//! SO(3) utilities shared by the attitude and bearing blocks of the filter.
//!
//! Provides skew-symmetric matrix construction, the orthonormal basis
//! constants, and the exponential / logarithm maps between rotation vectors
//! and unit quaternions.

use nalgebra::{Matrix2x3, Matrix3, UnitQuaternion, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-10;

/// Unit x axis.
pub const E_X: Vector3<f64> = Vector3::new(1.0, 0.0, 0.0);

/// Unit y axis.
pub const E_Y: Vector3<f64> = Vector3::new(0.0, 1.0, 0.0);

/// Unit z axis. Reference direction of every bearing quaternion.
pub const E_Z: Vector3<f64> = Vector3::new(0.0, 0.0, 1.0);

/// Projection onto the first two coordinates.
#[rustfmt::skip]
pub const I_2X3: Matrix2x3<f64> = Matrix2x3::new(
    1.0, 0.0, 0.0,
    0.0, 1.0, 0.0,
);

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
#[rustfmt::skip]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Exponential map: rotation vector δ → unit quaternion rotating by |δ| about δ.
///
/// ```text
/// exp(δ) = [cos(|δ|/2), sin(|δ|/2) δ/|δ|]
/// ```
///
/// Below the small-angle threshold the first-order expansion
/// `[1, δ/2]` is used and normalized.
pub fn exp_map(delta: &Vector3<f64>) -> UnitQuaternion<f64> {
    let theta = delta.norm();
    if theta < SMALL_ANGLE_THRESHOLD {
        let half = 0.5 * delta;
        return UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            1.0, half.x, half.y, half.z,
        ));
    }
    UnitQuaternion::from_scaled_axis(*delta)
}

/// Logarithm map: unit quaternion → rotation vector, inverse of [`exp_map`].
///
/// Always returns the short-way rotation (angle in `[0, π]`), so `q` and `-q`
/// map to the same vector.
pub fn log_map(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    let coords = q.quaternion().coords;
    let (w, v) = if coords.w < 0.0 {
        (-coords.w, -coords.xyz())
    } else {
        (coords.w, coords.xyz())
    };
    let sin_half = v.norm();
    if sin_half < SMALL_ANGLE_THRESHOLD {
        // First-order: q ≈ [1, δ/2]
        return 2.0 * v;
    }
    let theta = 2.0 * sin_half.atan2(w);
    v * (theta / sin_half)
}
