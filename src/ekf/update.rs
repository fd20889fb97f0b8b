//! Measurement models and the Kalman update.
//!
//! Every model produces a residual in the tangent space of the quantity it
//! observes, the Jacobian `H` of that residual with respect to the error
//! state, and the noise covariance `R` from [`crate::config::MeasurementNoise`].
//! Position and attitude measurements are relative to the current keyframe.

use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use tracing::debug;

use crate::error::{FilterError, Result};
use crate::geometry::{bearing_boxminus, skew, tangent_basis, Quat};

use super::depth::DepthFixReport;
use super::filter::{symmetrize, ViEkf};
use super::layout::{CoreBlock, StateLayout};
use super::types::FeatureId;

/// Inverse depth used for the depth prediction when the estimate is at or
/// near zero (landmark at infinity).
const MIN_PREDICTED_INV_DEPTH: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// Height above the keyframe origin (m); `h = −p_z` in the z-down frame.
    Altitude(f64),
    /// Horizontal accelerometer reading explained by rotor drag; `h = −μ v_xy`.
    Accel(Vector2<f64>),
    /// Keyframe-relative attitude.
    Attitude(Quat),
    /// Keyframe-relative position.
    Position(Vector3<f64>),
    /// Body-frame velocity.
    Velocity(Vector3<f64>),
    /// Unit bearing of a tracked feature in the camera frame.
    Bearing { id: FeatureId, zeta: Vector3<f64> },
    /// Pixel of a tracked feature; `h = π(ζ)` through the configured intrinsics.
    Pixel { id: FeatureId, uv: Vector2<f64> },
    /// Depth of a tracked feature along its bearing (m); `h = 1/ρ`.
    Depth { id: FeatureId, depth: f64 },
}

impl Measurement {
    pub fn name(&self) -> &'static str {
        match self {
            Measurement::Altitude(_) => "altitude",
            Measurement::Accel(_) => "accel",
            Measurement::Attitude(_) => "attitude",
            Measurement::Position(_) => "position",
            Measurement::Velocity(_) => "velocity",
            Measurement::Bearing { .. } => "bearing",
            Measurement::Pixel { .. } => "pixel",
            Measurement::Depth { .. } => "depth",
        }
    }

    /// Dimension of the residual.
    pub fn dim(&self) -> usize {
        match self {
            Measurement::Altitude(_) | Measurement::Depth { .. } => 1,
            Measurement::Accel(_) | Measurement::Bearing { .. } | Measurement::Pixel { .. } => 2,
            Measurement::Attitude(_) | Measurement::Position(_) | Measurement::Velocity(_) => 3,
        }
    }
}

/// Result of one update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// Innovation `z ⊟ h(x)` before the update.
    pub residual: DVector<f64>,
    /// Squared Mahalanobis distance `rᵀ S⁻¹ r`.
    pub mahalanobis: f64,
    /// False for passive updates.
    pub applied: bool,
    pub depth_fixes: DepthFixReport,
}

struct Linearization {
    residual: DVector<f64>,
    h: DMatrix<f64>,
    r: DMatrix<f64>,
}

impl Linearization {
    fn new(residual: DVector<f64>, error_dim: usize, variance: f64) -> Self {
        let m = residual.len();
        Self {
            residual,
            h: DMatrix::zeros(m, error_dim),
            r: DMatrix::identity(m, m) * variance,
        }
    }

    /// Write `I` into `H` at the given error-state column.
    fn identity_at(mut self, col: usize) -> Self {
        let m = self.residual.len();
        self.h
            .view_mut((0, col), (m, m))
            .copy_from(&DMatrix::identity(m, m));
        self
    }
}

fn check_finite(name: &str, values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(FilterError::InvalidMeasurement(format!(
            "non-finite {} measurement",
            name
        )))
    }
}

impl ViEkf {
    fn feature_slot(&self, id: FeatureId) -> Result<usize> {
        self.registry
            .global_to_local(id)
            .ok_or(FilterError::UnknownFeature(id))
    }

    fn linearize(&self, measurement: &Measurement) -> Result<Linearization> {
        let n = self.layout().error_dim();
        let noise = &self.config.noise;
        let pos = CoreBlock::Position.error().offset;
        let vel = CoreBlock::Velocity.error().offset;

        let lin = match measurement {
            Measurement::Altitude(z) => {
                check_finite("altitude", &[*z])?;
                let predicted = -self.x.position().z;
                let mut lin = Linearization::new(DVector::from_element(1, z - predicted), n, noise.altitude);
                lin.h[(0, pos + 2)] = -1.0;
                lin
            }
            Measurement::Accel(z) => {
                check_finite("accel", z.as_slice())?;
                let mu = self.x.drag();
                let v = self.x.velocity();
                let predicted = Vector2::new(-mu * v.x, -mu * v.y);
                let residual = z - predicted;
                let mut lin = Linearization::new(DVector::from_column_slice(residual.as_slice()), n, noise.accel);
                let drag = CoreBlock::Drag.error().offset;
                lin.h[(0, vel)] = -mu;
                lin.h[(1, vel + 1)] = -mu;
                lin.h[(0, drag)] = -v.x;
                lin.h[(1, drag)] = -v.y;
                lin
            }
            Measurement::Attitude(z) => {
                let residual = *z - self.x.attitude();
                Linearization::new(DVector::from_column_slice(residual.as_slice()), n, noise.attitude)
                    .identity_at(CoreBlock::Attitude.error().offset)
            }
            Measurement::Position(z) => {
                check_finite("position", z.as_slice())?;
                let residual = z - self.x.position();
                Linearization::new(DVector::from_column_slice(residual.as_slice()), n, noise.position)
                    .identity_at(pos)
            }
            Measurement::Velocity(z) => {
                check_finite("velocity", z.as_slice())?;
                let residual = z - self.x.velocity();
                Linearization::new(DVector::from_column_slice(residual.as_slice()), n, noise.velocity)
                    .identity_at(vel)
            }
            Measurement::Bearing { id, zeta } => {
                let slot = self.feature_slot(*id)?;
                let norm = zeta.norm();
                if !(norm.is_finite() && norm > 0.0) {
                    return Err(FilterError::InvalidMeasurement(format!(
                        "bearing for {} has norm {}",
                        id, norm
                    )));
                }
                let residual = bearing_boxminus(&Quat::from_bearing(zeta), &self.x.bearing(slot));
                Linearization::new(DVector::from_column_slice(residual.as_slice()), n, noise.feature)
                    .identity_at(StateLayout::feature_error(slot).bearing.offset)
            }
            Measurement::Pixel { id, uv } => {
                let slot = self.feature_slot(*id)?;
                check_finite("pixel", uv.as_slice())?;
                let q = self.x.bearing(slot);
                let zeta = self.x.zeta(slot);
                let camera = self.config.camera();
                let predicted = camera.project(&zeta).ok_or_else(|| {
                    FilterError::InvalidMeasurement(format!("{} is estimated behind the camera", id))
                })?;
                // ζ(q ⊞ dq) ≈ ζ − [ζ]× T_ζ dq
                let h_bearing = camera.projection_jacobian(&zeta) * (-skew(&zeta) * tangent_basis(&q));
                let residual = uv - predicted;
                let mut lin = Linearization::new(DVector::from_column_slice(residual.as_slice()), n, noise.pixel);
                lin.h
                    .view_mut((0, StateLayout::feature_error(slot).bearing.offset), (2, 2))
                    .copy_from(&h_bearing);
                lin
            }
            Measurement::Depth { id, depth } => {
                let slot = self.feature_slot(*id)?;
                if !(depth.is_finite() && *depth > 0.0) {
                    return Err(FilterError::InvalidMeasurement(format!(
                        "depth for {} is {}",
                        id, depth
                    )));
                }
                let rho = self.x.inv_depth(slot).max(MIN_PREDICTED_INV_DEPTH);
                let mut lin = Linearization::new(DVector::from_element(1, depth - 1.0 / rho), n, noise.depth);
                lin.h[(0, StateLayout::feature_error(slot).inv_depth)] = -1.0 / (rho * rho);
                lin
            }
        };
        Ok(lin)
    }

    /// Fuse one measurement.
    ///
    /// With `passive` set only the residual and its Mahalanobis distance are
    /// computed; state and covariance are left untouched. Otherwise the
    /// Joseph-form update is applied, weighted by the partial-update factors
    /// when configured, followed by depth enforcement.
    pub fn update(&mut self, measurement: &Measurement, passive: bool) -> Result<UpdateOutcome> {
        let Linearization { residual, h, r } = self.linearize(measurement)?;

        let ht = h.transpose();
        let s = &h * &self.p * &ht + &r;
        let s_inv = s.try_inverse().ok_or(FilterError::SingularInnovation)?;
        let mahalanobis = residual.dot(&(&s_inv * &residual));

        if passive {
            return Ok(UpdateOutcome {
                residual,
                mahalanobis,
                applied: false,
                depth_fixes: DepthFixReport::default(),
            });
        }

        let n = self.p.nrows();
        let k = &self.p * &ht * &s_inv;
        let mut dx = &k * &residual;
        let i_kh = DMatrix::<f64>::identity(n, n) - &k * &h;
        let mut p_plus = &i_kh * &self.p * i_kh.transpose() + &k * &r * k.transpose();

        if self.config.partial_update {
            let gamma = self.update_weights();
            dx.component_mul_assign(&gamma);
            let weights = &gamma * gamma.transpose();
            p_plus = &self.p + (p_plus - &self.p).component_mul(&weights);
        }
        symmetrize(&mut p_plus);

        self.apply_correction(&dx);
        self.p = p_plus;
        let depth_fixes = self.fix_depth();

        debug!(
            kind = measurement.name(),
            mahalanobis,
            correction = dx.norm(),
            "update applied"
        );

        Ok(UpdateOutcome {
            residual,
            mahalanobis,
            applied: true,
            depth_fixes,
        })
    }
}
