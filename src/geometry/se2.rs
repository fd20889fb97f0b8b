//! Planar rigid transforms (x, y, heading).
//!
//! Used for the keyframe graph: each keyframe reset moves the planar part of
//! the relative pose into an SE(2) edge.
//!
//! Heading wrapping applies a single ±2π correction per composition. Inputs
//! must already lie within one turn of `(-π, π]`; the correction is not a
//! general modulo.

use std::f64::consts::PI;

use nalgebra::Vector3;

/// Planar pose `(x, y, ψ)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Se2 {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl Se2 {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }

    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.heading)
    }

    /// `self ∘ other`: `other` expressed in the frame of `self`.
    pub fn concatenate(&self, other: &Se2) -> Se2 {
        let (ss, cs) = self.heading.sin_cos();
        let mut psi = self.heading + other.heading;
        if psi > PI {
            psi -= 2.0 * PI;
        } else if psi < -PI {
            psi += 2.0 * PI;
        }
        Se2 {
            x: self.x + other.x * cs - other.y * ss,
            y: self.y + other.x * ss + other.y * cs,
            heading: psi,
        }
    }

    pub fn inverse(&self) -> Se2 {
        let (ss, cs) = self.heading.sin_cos();
        Se2 {
            x: -(self.x * cs + self.y * ss),
            y: -(-self.x * ss + self.y * cs),
            heading: -self.heading,
        }
    }
}

/// Vector form of [`Se2::concatenate`] on `(x, y, ψ)` triples.
pub fn concatenate_se2(t1: &Vector3<f64>, t2: &Vector3<f64>) -> Vector3<f64> {
    Se2::from_vector(t1)
        .concatenate(&Se2::from_vector(t2))
        .to_vector()
}

/// Vector form of [`Se2::inverse`] on an `(x, y, ψ)` triple.
pub fn invert_se2(t: &Vector3<f64>) -> Vector3<f64> {
    Se2::from_vector(t).inverse().to_vector()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_concatenate_translates_in_parent_frame() {
        let t1 = Se2::new(1.0, 2.0, PI / 2.0);
        let t2 = Se2::new(1.0, 0.0, 0.0);

        let out = t1.concatenate(&t2);

        assert_relative_eq!(out.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(out.y, 3.0, epsilon = 1e-12);
        assert_relative_eq!(out.heading, PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_heading_wraps_once() {
        let out = concatenate_se2(&Vector3::new(0.0, 0.0, 3.0), &Vector3::new(0.0, 0.0, 0.5));
        assert_relative_eq!(out.z, 3.5 - 2.0 * PI, epsilon = 1e-12);

        let out = concatenate_se2(&Vector3::new(0.0, 0.0, -3.0), &Vector3::new(0.0, 0.0, -0.5));
        assert_relative_eq!(out.z, -3.5 + 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_single_correction_is_not_a_modulo() {
        // Two full corrections would be needed; only one is applied.
        let out = concatenate_se2(&Vector3::new(0.0, 0.0, 3.0), &Vector3::new(0.0, 0.0, 7.0));
        assert_relative_eq!(out.z, 10.0 - 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_law_randomized() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let heading = if rng.gen_bool(0.5) {
                // Near the wrap-around boundary.
                rng.gen_range(PI - 1e-3..PI) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 }
            } else {
                rng.gen_range(-PI..PI)
            };
            let t = Vector3::new(rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0), heading);

            let inv = invert_se2(&t);
            let left = concatenate_se2(&t, &inv);
            let right = concatenate_se2(&inv, &t);

            assert_relative_eq!(left, Vector3::zeros(), epsilon = 1e-9);
            assert_relative_eq!(right, Vector3::zeros(), epsilon = 1e-9);
        }
    }
}
