//! Nominal filter state and the manifold perturbation operators.
//!
//! `boxplus` applies an error-state correction to a nominal state and
//! `boxminus` measures the error-state difference between two nominal states:
//!
//! ```text
//! euclidean blocks   x ⊞ δ = x + δ              x1 ⊟ x2 = x1 - x2
//! attitude           q ⊞ δ = q ⊗ exp(δ)         q1 ⊟ q2 = log(q2⁻¹ ⊗ q1)
//! bearing            q ⊞ d = exp(T_ζ(q) d) ⊗ q  q1 ⊟ q2 = θ T_ζ(q2)ᵀ â
//! inverse depth      ρ ⊞ δ = ρ + δ              ρ1 ⊟ ρ2 = ρ1 - ρ2
//! ```

use nalgebra::{DVector, Vector2, Vector3};

use crate::config::CoreStateVector;
use crate::geometry::{bearing, bearing_boxminus, bearing_boxplus, bearing_difference, Quat, Xform};
use crate::imu::ImuBias;

use super::layout::{CoreBlock, StateLayout, CORE_STATE_DIM, FEATURE_STATE_DIM};

/// Nominal state `[core | features]`, see [`super::layout`].
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    x: DVector<f64>,
}

impl State {
    /// State with the given core block and no features.
    pub fn from_core(core: &CoreStateVector) -> Self {
        let mut state = Self {
            x: DVector::from_column_slice(core.as_slice()),
        };
        let q = state.attitude();
        state.set_attitude(&q);
        state
    }

    /// Wrap a raw nominal vector. Returns `None` when its length is not
    /// `17 + 5N`. Quaternion blocks are normalized.
    pub fn from_vector(x: DVector<f64>) -> Option<Self> {
        let num_features = StateLayout::features_from_state_dim(x.len())?;
        let mut state = Self { x };
        let q = state.attitude();
        state.set_attitude(&q);
        for slot in 0..num_features {
            let q = state.bearing(slot);
            state.set_bearing(slot, &q);
        }
        Some(state)
    }

    pub fn as_vector(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn layout(&self) -> StateLayout {
        StateLayout::new(self.num_features())
    }

    pub fn num_features(&self) -> usize {
        (self.x.len() - CORE_STATE_DIM) / FEATURE_STATE_DIM
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Core block accessors
    // ─────────────────────────────────────────────────────────────────────────

    fn vec3(&self, block: CoreBlock) -> Vector3<f64> {
        self.x.fixed_rows::<3>(block.state().offset).into_owned()
    }

    fn set_vec3(&mut self, block: CoreBlock, v: &Vector3<f64>) {
        self.x.fixed_rows_mut::<3>(block.state().offset).copy_from(v);
    }

    pub fn position(&self) -> Vector3<f64> {
        self.vec3(CoreBlock::Position)
    }

    pub fn set_position(&mut self, p: &Vector3<f64>) {
        self.set_vec3(CoreBlock::Position, p);
    }

    /// Body-frame velocity.
    pub fn velocity(&self) -> Vector3<f64> {
        self.vec3(CoreBlock::Velocity)
    }

    pub fn set_velocity(&mut self, v: &Vector3<f64>) {
        self.set_vec3(CoreBlock::Velocity, v);
    }

    pub fn attitude(&self) -> Quat {
        Quat::from_vector(
            &self
                .x
                .fixed_rows::<4>(CoreBlock::Attitude.state().offset)
                .into_owned(),
        )
    }

    pub fn set_attitude(&mut self, q: &Quat) {
        self.x
            .fixed_rows_mut::<4>(CoreBlock::Attitude.state().offset)
            .copy_from(&q.to_vector());
    }

    pub fn accel_bias(&self) -> Vector3<f64> {
        self.vec3(CoreBlock::AccelBias)
    }

    pub fn gyro_bias(&self) -> Vector3<f64> {
        self.vec3(CoreBlock::GyroBias)
    }

    pub fn biases(&self) -> ImuBias {
        ImuBias {
            accel: self.accel_bias(),
            gyro: self.gyro_bias(),
        }
    }

    pub fn set_biases(&mut self, bias: &ImuBias) {
        self.set_vec3(CoreBlock::AccelBias, &bias.accel);
        self.set_vec3(CoreBlock::GyroBias, &bias.gyro);
    }

    pub fn drag(&self) -> f64 {
        self.x[CoreBlock::Drag.state().offset]
    }

    pub fn set_drag(&mut self, mu: f64) {
        self.x[CoreBlock::Drag.state().offset] = mu;
    }

    /// Pose relative to the current keyframe.
    pub fn relative_pose(&self) -> Xform {
        Xform::new(self.position(), self.attitude())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Feature block accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn bearing(&self, slot: usize) -> Quat {
        let block = StateLayout::feature_state(slot).bearing;
        Quat::from_vector(&self.x.fixed_rows::<4>(block.offset).into_owned())
    }

    pub fn set_bearing(&mut self, slot: usize, q: &Quat) {
        let block = StateLayout::feature_state(slot).bearing;
        self.x.fixed_rows_mut::<4>(block.offset).copy_from(&q.to_vector());
    }

    /// Unit bearing of feature `slot` in the camera frame.
    pub fn zeta(&self, slot: usize) -> Vector3<f64> {
        bearing::zeta(&self.bearing(slot))
    }

    pub fn inv_depth(&self, slot: usize) -> f64 {
        self.x[StateLayout::feature_state(slot).inv_depth]
    }

    pub fn set_inv_depth(&mut self, slot: usize, rho: f64) {
        self.x[StateLayout::feature_state(slot).inv_depth] = rho;
    }

    /// Append a feature block at the next slot.
    pub(crate) fn push_feature(&mut self, q: &Quat, rho: f64) {
        let offset = self.x.len();
        let x = std::mem::replace(&mut self.x, DVector::zeros(0));
        self.x = x.insert_rows(offset, FEATURE_STATE_DIM, 0.0);
        let slot = self.num_features() - 1;
        self.set_bearing(slot, q);
        self.set_inv_depth(slot, rho);
    }

    /// Remove the feature block at `slot`, shifting later slots down.
    pub(crate) fn remove_feature(&mut self, slot: usize) {
        let block = StateLayout::feature_state(slot);
        let x = std::mem::replace(&mut self.x, DVector::zeros(0));
        self.x = x.remove_rows(block.bearing.offset, FEATURE_STATE_DIM);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Manifold operators
    // ─────────────────────────────────────────────────────────────────────────

    /// `self ⊞ dx`. `dx` must have the error dimension of this state.
    pub fn boxplus(&self, dx: &DVector<f64>) -> State {
        let layout = self.layout();
        debug_assert_eq!(dx.len(), layout.error_dim(), "error-state dimension mismatch");

        let mut out = self.x.clone();
        for block in CoreBlock::ALL {
            let s = block.state();
            let e = block.error();
            if block.is_euclidean() {
                let mut segment = out.rows_mut(s.offset, s.width);
                segment += dx.rows(e.offset, e.width);
            } else {
                let delta = dx.fixed_rows::<3>(e.offset).into_owned();
                let q = self.attitude() + delta;
                out.fixed_rows_mut::<4>(s.offset).copy_from(&q.to_vector());
            }
        }

        for slot in 0..layout.num_features {
            let fs = StateLayout::feature_state(slot);
            let fe = StateLayout::feature_error(slot);
            let dq: Vector2<f64> = dx.fixed_rows::<2>(fe.bearing.offset).into_owned();
            let q = bearing_boxplus(&self.bearing(slot), &dq);
            out.fixed_rows_mut::<4>(fs.bearing.offset)
                .copy_from(&q.to_vector());
            out[fs.inv_depth] += dx[fe.inv_depth];
        }

        State { x: out }
    }

    /// `self ⊟ other`, such that `other.boxplus(&self.boxminus(other)) ≈ self`.
    pub fn boxminus(&self, other: &State) -> DVector<f64> {
        self.difference(other, bearing_boxminus)
    }

    /// [`State::boxminus`] with bearings compared through
    /// [`bearing_difference`], which keeps separations below `1e-8`.
    /// Finite-difference Jacobians go through this.
    pub fn tangent_difference(&self, other: &State) -> DVector<f64> {
        self.difference(other, bearing_difference)
    }

    fn difference(&self, other: &State, bearing_minus: fn(&Quat, &Quat) -> Vector2<f64>) -> DVector<f64> {
        let layout = self.layout();
        debug_assert_eq!(
            layout.num_features,
            other.num_features(),
            "boxminus between states with different feature counts"
        );

        let mut dx = DVector::zeros(layout.error_dim());
        for block in CoreBlock::ALL {
            let s = block.state();
            let e = block.error();
            if block.is_euclidean() {
                let diff = self.x.rows(s.offset, s.width) - other.x.rows(s.offset, s.width);
                dx.rows_mut(e.offset, e.width).copy_from(&diff);
            } else {
                let delta = self.attitude() - other.attitude();
                dx.fixed_rows_mut::<3>(e.offset).copy_from(&delta);
            }
        }

        for slot in 0..layout.num_features {
            let fs = StateLayout::feature_state(slot);
            let fe = StateLayout::feature_error(slot);
            let dq = bearing_minus(&self.bearing(slot), &other.bearing(slot));
            dx.fixed_rows_mut::<2>(fe.bearing.offset).copy_from(&dq);
            dx[fe.inv_depth] = self.x[fs.inv_depth] - other.x[fs.inv_depth];
        }

        dx
    }

    /// Largest deviation from unit norm over all quaternion blocks.
    pub fn max_quat_norm_error(&self) -> f64 {
        let attitude = CoreBlock::Attitude.state();
        let mut worst = (self.x.rows(attitude.offset, 4).norm() - 1.0).abs();
        for slot in 0..self.num_features() {
            let block = StateLayout::feature_state(slot).bearing;
            worst = worst.max((self.x.rows(block.offset, 4).norm() - 1.0).abs());
        }
        worst
    }
}
