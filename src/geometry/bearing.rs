//! Bearing (unit direction) parameterization on the 2-sphere.
//!
//! A bearing is stored as a unit quaternion `q` with `ζ = q * e_z`. Only the
//! direction is observable, so the tangent space is two dimensional and is
//! spanned by the rotated x and y axes:
//!
//! ```text
//! T_ζ(q) = R(q) · I_2x3ᵀ      (3x2, columns ⟂ ζ)
//! q ⊞ dq = exp(T_ζ(q) · dq) ⊗ q
//! ```

use std::f64::consts::PI;

use nalgebra::{Vector2, Vector3};

use super::quat::Quat;
use super::so3::{E_Z, I_2X3};

/// Below this squared separation two bearings are treated as identical.
const SAME_BEARING_EPS: f64 = 1e-16;

/// Below this cross-product norm two bearings are treated as parallel.
const ANTIPODAL_EPS: f64 = 1e-12;

/// Unit bearing direction `ζ = q * e_z`.
#[inline]
pub fn zeta(q: &Quat) -> Vector3<f64> {
    q.rotate(&E_Z)
}

/// 3x2 Jacobian lifting a 2-D bearing perturbation into 3-space.
#[inline]
pub fn tangent_basis(q: &Quat) -> nalgebra::Matrix3x2<f64> {
    q.double_rotate(&I_2X3.transpose())
}

/// Applies a tangent-plane perturbation to a bearing quaternion.
pub fn bearing_boxplus(q: &Quat, dq: &Vector2<f64>) -> Quat {
    Quat::exp(&(tangent_basis(q) * dq)) * *q
}

/// Tangent-plane difference `q0 ⊟ q1`, expressed in the frame of `q1`.
///
/// Only the directions `ζ0`, `ζ1` matter; the twist of either quaternion about
/// its own bearing does not contribute. Bearings closer than `1e-8` compare
/// equal.
pub fn bearing_boxminus(q0: &Quat, q1: &Quat) -> Vector2<f64> {
    if (zeta(q0) - zeta(q1)).norm_squared() < SAME_BEARING_EPS {
        return Vector2::zeros();
    }
    bearing_difference(q0, q1)
}

/// Same as [`bearing_boxminus`] without the equality cutoff, so separations
/// far below `1e-8` are still resolved. Used for numerical differentiation.
pub fn bearing_difference(q0: &Quat, q1: &Quat) -> Vector2<f64> {
    let zeta0 = zeta(q0);
    let zeta1 = zeta(q1);
    let basis = tangent_basis(q1);
    let cross = zeta1.cross(&zeta0);
    let cross_norm = cross.norm();
    let dot = zeta1.dot(&zeta0);

    if cross_norm < ANTIPODAL_EPS {
        if dot > 0.0 {
            // θ ≈ |ζ1 × ζ0| for nearly parallel bearings.
            return basis.transpose() * cross;
        }
        // Antipodal: every great circle through ζ1 reaches ζ0, pick the first tangent axis.
        return Vector2::new(PI, 0.0);
    }

    let theta = cross_norm.atan2(dot);
    theta / cross_norm * (basis.transpose() * cross)
}
