//! Rigid 3-D transform (translation + rotation).
//!
//! `Xform` maps points from its child frame into its parent frame:
//! `p_parent = q * p_child + t`. Composition `a * b` chains frames the usual
//! way, so `global = keyframe * relative`.

use std::ops::Mul;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::quat::Quat;
use super::se2::Se2;

/// Child-to-parent transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xform {
    pub t: Vector3<f64>,
    pub q: Quat,
}

impl Xform {
    pub fn new(t: Vector3<f64>, q: Quat) -> Self {
        Self { t, q }
    }

    /// Transform with coincident frames.
    pub fn identity() -> Self {
        Self {
            t: Vector3::zeros(),
            q: Quat::identity(),
        }
    }

    /// Lift a planar pose into 3-D (z = 0, rotation about +z).
    pub fn from_se2(pose: &Se2) -> Self {
        Self {
            t: Vector3::new(pose.x, pose.y, 0.0),
            q: Quat::from_yaw(pose.heading),
        }
    }

    /// Compose `self ∘ other`.
    pub fn compose(&self, other: &Xform) -> Xform {
        Xform {
            t: self.t + self.q.rotate(&other.t),
            q: self.q * other.q,
        }
    }

    /// Parent-to-child transform.
    pub fn inverse(&self) -> Xform {
        let q_inv = self.q.inverse();
        Xform {
            t: -q_inv.rotate(&self.t),
            q: q_inv,
        }
    }

    /// Child-frame point expressed in the parent frame.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.q.rotate(p) + self.t
    }

    /// Parent-frame point expressed in the child frame.
    pub fn inverse_transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.q.rotate_passive(&(p - self.t))
    }
}

impl Default for Xform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Xform {
    type Output = Xform;

    fn mul(self, rhs: Xform) -> Xform {
        self.compose(&rhs)
    }
}

impl Mul<&Xform> for &Xform {
    type Output = Xform;

    fn mul(self, rhs: &Xform) -> Xform {
        self.compose(rhs)
    }
}
