//! IMU-driven propagation.
//!
//! The nominal state is integrated with a first-order step of the
//! continuous dynamics (body-frame velocity, keyframe-relative pose):
//!
//! ```text
//! ṗ = q · v
//! v̇ = a + q⁻¹ · g − ω × v          a = acc − b_a,  ω = gyro − b_g
//! q̇ = q ⊗ [0, ω/2]
//! ζ̇ = −ω_c × ζ − ρ (I − ζζᵀ) v_c    ρ̇ = ρ² ζᵀ v_c
//! ```
//!
//! with `ω_c`, `v_c` the camera angular and linear velocity in the camera
//! frame. The error-state transition `F` and the input Jacobian `G` are
//! obtained by central differences through `boxplus` and
//! [`State::tangent_difference`], so they stay consistent with the manifold
//! structure of every block.

use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3, Vector6};
use tracing::trace;

use crate::error::{FilterError, Result};
use crate::geometry::{bearing_boxplus, tangent_basis, Quat};
use crate::imu::{ImuSample, GRAVITY};

use super::depth::DepthFixReport;
use super::filter::{symmetrize, ViEkf};
use super::state::State;

/// Perturbation used for the numerical Jacobians.
const JACOBIAN_STEP: f64 = 1e-6;

/// Fixed parameters of the motion model.
#[derive(Debug, Clone, Copy)]
pub struct Kinematics {
    /// Camera-to-body rotation.
    pub q_b_c: Quat,
    /// Camera position in the body frame.
    pub p_b_c: Vector3<f64>,
    pub use_drag_term: bool,
}

impl Kinematics {
    /// Continuous-time acceleration of the body-frame velocity.
    fn velocity_dot(&self, x: &State, accel: &Vector3<f64>, omega: &Vector3<f64>) -> Vector3<f64> {
        let v = x.velocity();
        let gravity_body = x.attitude().rotate_passive(&GRAVITY);
        let mut specific_force = *accel;
        if self.use_drag_term {
            let mu = x.drag();
            specific_force.x = -mu * v.x;
            specific_force.y = -mu * v.y;
        }
        specific_force + gravity_body - omega.cross(&v)
    }

    /// Integrate `x` over `dt` with IMU input `u = [acc, gyro]`.
    pub fn step(&self, x: &State, u: &Vector6<f64>, dt: f64) -> State {
        let bias = x.biases();
        let accel = u.fixed_rows::<3>(0) - bias.accel;
        let omega = u.fixed_rows::<3>(3) - bias.gyro;

        let q = x.attitude();
        let v = x.velocity();
        let v_dot = self.velocity_dot(x, &accel, &omega);

        let mut next = x.clone();
        next.set_position(&(x.position() + q.rotate(&(v * dt + v_dot * (0.5 * dt * dt)))));
        next.set_velocity(&(v + v_dot * dt));
        next.set_attitude(&(q + omega * dt));

        let omega_c = self.q_b_c.rotate_passive(&omega);
        let v_c = self.q_b_c.rotate_passive(&(v + omega.cross(&self.p_b_c)));
        for slot in 0..x.num_features() {
            let q_zeta = x.bearing(slot);
            let zeta = x.zeta(slot);
            let rho = x.inv_depth(slot);

            let zeta_dot =
                -omega_c.cross(&zeta) - (Matrix3::identity() - zeta * zeta.transpose()) * v_c * rho;
            let rho_dot = rho * rho * zeta.dot(&v_c);

            // Angular rate of the bearing, projected onto its tangent plane.
            let rate = zeta.cross(&zeta_dot);
            let dq: Vector2<f64> = tangent_basis(&q_zeta).transpose() * rate * dt;
            next.set_bearing(slot, &bearing_boxplus(&q_zeta, &dq));
            next.set_inv_depth(slot, rho + rho_dot * dt);
        }
        next
    }

    /// Error-state transition `F = ∂x⁺/∂δx` and input Jacobian `G = ∂x⁺/∂u`.
    pub fn jacobians(&self, x: &State, u: &Vector6<f64>, dt: f64) -> (DMatrix<f64>, DMatrix<f64>) {
        let nominal = self.step(x, u, dt);
        let n = x.layout().error_dim();
        let h = JACOBIAN_STEP;

        let mut f = DMatrix::zeros(n, n);
        let mut dx = DVector::zeros(n);
        for j in 0..n {
            dx[j] = h;
            let plus = self.step(&x.boxplus(&dx), u, dt).tangent_difference(&nominal);
            dx[j] = -h;
            let minus = self.step(&x.boxplus(&dx), u, dt).tangent_difference(&nominal);
            dx[j] = 0.0;
            f.set_column(j, &((plus - minus) / (2.0 * h)));
        }

        let mut g = DMatrix::zeros(n, 6);
        for j in 0..6 {
            let mut u_plus = *u;
            u_plus[j] += h;
            let mut u_minus = *u;
            u_minus[j] -= h;
            let plus = self.step(x, &u_plus, dt).tangent_difference(&nominal);
            let minus = self.step(x, &u_minus, dt).tangent_difference(&nominal);
            g.set_column(j, &((plus - minus) / (2.0 * h)));
        }

        (f, g)
    }
}

impl ViEkf {
    pub fn kinematics(&self) -> Kinematics {
        Kinematics {
            q_b_c: self.q_b_c,
            p_b_c: self.config.p_b_c,
            use_drag_term: self.config.use_drag_term,
        }
    }

    /// Propagate the state and covariance to the timestamp of `imu`.
    ///
    /// The first sample only initializes time. Samples must arrive with
    /// strictly increasing timestamps.
    pub fn propagate(&mut self, imu: &ImuSample) -> Result<DepthFixReport> {
        let Some(last) = self.last_imu_time else {
            self.last_imu_time = Some(imu.timestamp_s);
            return Ok(DepthFixReport::default());
        };
        let dt = imu.timestamp_s - last;
        if dt.is_nan() || dt <= 0.0 {
            return Err(FilterError::NonMonotonicTimestamp {
                last,
                current: imu.timestamp_s,
            });
        }
        let u = imu.as_vector();
        if u.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::InvalidMeasurement(format!(
                "non-finite IMU sample at t={:.6}",
                imu.timestamp_s
            )));
        }

        let kinematics = self.kinematics();
        let (f, g) = kinematics.jacobians(&self.x, &u, dt);

        // G maps discrete input perturbations; Q_u is a continuous density.
        let g_rate = g / dt;
        let qu = DMatrix::from_diagonal(&DVector::from_column_slice(self.config.qu.as_slice()));
        let qx = DMatrix::from_diagonal(&self.process_noise());

        let mut p = &f * &self.p * f.transpose() + (&g_rate * qu * g_rate.transpose() + qx) * dt;
        symmetrize(&mut p);

        self.x = kinematics.step(&self.x, &u, dt);
        self.p = p;
        self.last_imu_time = Some(imu.timestamp_s);
        trace!(dt, features = self.len_features(), "propagated");

        Ok(self.fix_depth())
    }
}
