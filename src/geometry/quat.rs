//! Unit quaternion with manifold `+`/`-` operators.
//!
//! `q + δ` applies a right-multiplicative perturbation `q ⊗ exp(δ)` and
//! `q1 - q2` returns the rotation vector `log(q2⁻¹ ⊗ q1)`, so that
//! `q2 + (q1 - q2) == q1` up to the quaternion double cover.
//!
//! Normalization is restored at every construction boundary; products of
//! unit quaternions are kept as-is.

use std::ops::{Add, Mul, Sub};

use nalgebra::{Matrix3, Matrix3x2, Quaternion, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use super::so3::{exp_map, log_map, E_Z};

/// Unit quaternion, Hamilton convention, active rotation.
///
/// Serialized as scalar-first `[w, x, y, z]`; deserialized values are
/// normalized and zero or non-finite components are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vector4<f64>", into = "Vector4<f64>")]
pub struct Quat(UnitQuaternion<f64>);

impl Quat {
    /// No rotation.
    pub fn identity() -> Self {
        Self(UnitQuaternion::identity())
    }

    /// Build from scalar-first components; the result is normalized.
    pub fn from_wxyz(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self(UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)))
    }

    /// Build from a scalar-first 4-vector `[w, x, y, z]`; the result is normalized.
    pub fn from_vector(v: &Vector4<f64>) -> Self {
        Self::from_wxyz(v[0], v[1], v[2], v[3])
    }

    /// Scalar-first components `[w, x, y, z]`.
    pub fn to_vector(&self) -> Vector4<f64> {
        let c = self.0.quaternion().coords;
        Vector4::new(c.w, c.x, c.y, c.z)
    }

    /// Rotation by `|δ|` about `δ`, see [`exp_map`].
    pub fn exp(delta: &Vector3<f64>) -> Self {
        Self(exp_map(delta))
    }

    /// Short-way rotation vector, inverse of [`Quat::exp`].
    pub fn log(&self) -> Vector3<f64> {
        log_map(&self.0)
    }

    /// Conjugate rotation.
    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    /// Rotation about +z by `yaw` radians.
    pub fn from_yaw(yaw: f64) -> Self {
        Self(UnitQuaternion::from_euler_angles(0.0, 0.0, yaw))
    }

    /// Build from roll, pitch, yaw (intrinsic z-y-x).
    pub fn from_euler(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Heading component of the z-y-x Euler decomposition.
    pub fn yaw(&self) -> f64 {
        self.0.euler_angles().2
    }

    /// Shortest rotation taking unit vector `from` onto unit vector `to`.
    ///
    /// Antiparallel inputs rotate by π about an axis orthogonal to `from`.
    pub fn from_two_unit_vectors(from: &Vector3<f64>, to: &Vector3<f64>) -> Self {
        match UnitQuaternion::rotation_between(from, to) {
            Some(q) => Self(q),
            None => {
                let helper = if from.x.abs() < 0.9 {
                    Vector3::x()
                } else {
                    Vector3::y()
                };
                let axis = from.cross(&helper).normalize();
                Self::exp(&(axis * std::f64::consts::PI))
            }
        }
    }

    /// Quaternion whose active rotation takes `e_z` onto the unit bearing `zeta`.
    pub fn from_bearing(zeta: &Vector3<f64>) -> Self {
        Self::from_two_unit_vectors(&E_Z, &zeta.normalize())
    }

    /// Active rotation `q ⊗ v ⊗ q⁻¹`.
    pub fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.0 * v
    }

    /// Passive rotation `q⁻¹ ⊗ v ⊗ q`.
    pub fn rotate_passive(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.0.inverse_transform_vector(v)
    }

    /// Rotates every column of `m`: `R(q) · m`.
    pub fn double_rotate(&self, m: &Matrix3x2<f64>) -> Matrix3x2<f64> {
        self.rotation_matrix() * m
    }

    /// Active rotation matrix `R(q)`.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.0.to_rotation_matrix().into_inner()
    }

    /// Deviation of the stored components from unit norm.
    pub fn norm_error(&self) -> f64 {
        (self.0.quaternion().norm() - 1.0).abs()
    }
}

impl TryFrom<Vector4<f64>> for Quat {
    type Error = String;

    fn try_from(v: Vector4<f64>) -> Result<Self, Self::Error> {
        let norm = v.norm();
        if !(norm.is_finite() && norm > 1e-9) {
            return Err(format!("not a rotation quaternion: {:?}", v.as_slice()));
        }
        Ok(Self::from_vector(&v))
    }
}

impl From<Quat> for Vector4<f64> {
    fn from(q: Quat) -> Self {
        q.to_vector()
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Quat {
    type Output = Quat;

    fn mul(self, rhs: Quat) -> Quat {
        Quat(self.0 * rhs.0)
    }
}

impl Add<Vector3<f64>> for Quat {
    type Output = Quat;

    fn add(self, delta: Vector3<f64>) -> Quat {
        Quat(self.0 * exp_map(&delta))
    }
}

impl Sub for Quat {
    type Output = Vector3<f64>;

    fn sub(self, rhs: Quat) -> Vector3<f64> {
        log_map(&(rhs.0.inverse() * self.0))
    }
}

impl From<UnitQuaternion<f64>> for Quat {
    fn from(q: UnitQuaternion<f64>) -> Self {
        Self(q)
    }
}
