//! The filter context.
//!
//! [`ViEkf`] owns the nominal state, the error covariance and the feature
//! registry, and is the only place where the three change size. Propagation,
//! measurement updates and keyframe handling are implemented as further
//! `impl ViEkf` blocks in their own modules.

use nalgebra::{DMatrix, DVector, SMatrix, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CoreErrorVector, EkfConfig};
use crate::error::{FilterError, Result};
use crate::geometry::{Quat, Xform};

use super::depth::{DepthConstraint, DepthFixReport};
use super::keyframe::KeyframeGraph;
use super::layout::{StateLayout, CORE_ERROR_DIM, FEATURE_ERROR_DIM};
use super::registry::FeatureRegistry;
use super::state::State;
use super::types::FeatureId;

/// Covariance of the core error state.
pub type CoreCovariance = SMatrix<f64, CORE_ERROR_DIM, CORE_ERROR_DIM>;

/// Snapshot of one tracked feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEstimate {
    pub id: FeatureId,
    /// Unit bearing in the camera frame.
    pub zeta: Vector3<f64>,
    pub inv_depth: f64,
    pub inv_depth_variance: f64,
}

impl FeatureEstimate {
    /// Estimated landmark position in the camera frame.
    pub fn camera_point(&self) -> Vector3<f64> {
        self.zeta / self.inv_depth
    }
}

pub struct ViEkf {
    pub(super) config: EkfConfig,
    pub(super) x: State,
    pub(super) p: DMatrix<f64>,
    pub(super) registry: FeatureRegistry,
    pub(super) depth: DepthConstraint,
    pub(super) q_b_c: Quat,
    /// Global pose of the current keyframe; `x` is relative to it.
    pub(super) keyframe_pose: Xform,
    pub(super) keyframes: KeyframeGraph,
    /// Features tracked when the current keyframe was taken.
    pub(super) keyframe_features: Vec<FeatureId>,
    pub(super) last_imu_time: Option<f64>,
}

impl ViEkf {
    pub fn new(config: EkfConfig) -> Result<Self> {
        config.validate()?;

        let x = State::from_core(&config.x0);
        let p = DMatrix::from_diagonal(&DVector::from_column_slice(config.p0.as_slice()));
        let q_b_c = Quat::from_vector(&config.q_b_c);

        info!(
            "filter initialized: max_features={}, min_depth={}, drag_term={}, partial_update={}",
            config.max_features, config.min_depth, config.use_drag_term, config.partial_update
        );

        Ok(Self {
            registry: FeatureRegistry::with_capacity(config.max_features),
            depth: DepthConstraint::new(config.min_depth, config.p0_feat[2]),
            x,
            p,
            q_b_c,
            keyframe_pose: Xform::identity(),
            keyframes: KeyframeGraph::new(),
            keyframe_features: Vec::new(),
            last_imu_time: None,
            config,
        })
    }

    pub fn config(&self) -> &EkfConfig {
        &self.config
    }

    pub fn state(&self) -> &State {
        &self.x
    }

    /// Full error covariance, `(16 + 3N)²`.
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }

    pub fn core_covariance(&self) -> CoreCovariance {
        self.p
            .fixed_view::<CORE_ERROR_DIM, CORE_ERROR_DIM>(0, 0)
            .into_owned()
    }

    pub fn layout(&self) -> StateLayout {
        self.x.layout()
    }

    /// Timestamp of the last IMU sample propagated through.
    pub fn last_imu_time(&self) -> Option<f64> {
        self.last_imu_time
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Feature lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn len_features(&self) -> usize {
        self.registry.len()
    }

    /// Tracked ids in slot order.
    pub fn feature_ids(&self) -> &[FeatureId] {
        self.registry.ids()
    }

    pub fn global_to_local(&self, id: FeatureId) -> Option<usize> {
        self.registry.global_to_local(id)
    }

    pub fn is_tracking(&self, id: FeatureId) -> bool {
        self.registry.contains(id)
    }

    /// Start tracking `id` with unit bearing `zeta` (camera frame).
    ///
    /// The inverse depth comes from `depth` when it is a positive finite
    /// value, otherwise from `1 / (2 min_depth)`. The new covariance block is
    /// `diag(p0_feat)` with zero cross-covariance. Registry, state and
    /// covariance grow together or not at all.
    pub fn init_feature(
        &mut self,
        id: FeatureId,
        zeta: &Vector3<f64>,
        depth: Option<f64>,
    ) -> Result<usize> {
        let norm = zeta.norm();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(FilterError::InvalidMeasurement(format!(
                "bearing for {} has norm {}",
                id, norm
            )));
        }

        let slot = self.registry.insert(id)?;

        let rho = match depth {
            Some(d) if d.is_finite() && d > 0.0 => 1.0 / d,
            _ => self.config.default_inverse_depth(),
        };
        self.x.push_feature(&Quat::from_bearing(zeta), rho);

        let n = self.p.nrows();
        let p = std::mem::replace(&mut self.p, DMatrix::zeros(0, 0));
        let mut p = p
            .insert_rows(n, FEATURE_ERROR_DIM, 0.0)
            .insert_columns(n, FEATURE_ERROR_DIM, 0.0);
        for i in 0..FEATURE_ERROR_DIM {
            p[(n + i, n + i)] = self.config.p0_feat[i];
        }
        self.p = p;

        debug_assert!(self.check_invariants());
        Ok(slot)
    }

    /// Stop tracking `id`. Returns `false` when it was not tracked.
    pub fn clear_feature(&mut self, id: FeatureId) -> bool {
        let Some(slot) = self.registry.remove(id) else {
            return false;
        };

        self.x.remove_feature(slot);
        let offset = StateLayout::feature_error(slot).bearing.offset;
        let p = std::mem::replace(&mut self.p, DMatrix::zeros(0, 0));
        self.p = p
            .remove_rows(offset, FEATURE_ERROR_DIM)
            .remove_columns(offset, FEATURE_ERROR_DIM);

        debug_assert!(self.check_invariants());
        true
    }

    /// Drop every tracked feature whose id is not in `keep`.
    /// Returns the number of features removed.
    pub fn keep_only_features(&mut self, keep: &[FeatureId]) -> usize {
        let lost: Vec<FeatureId> = self
            .registry
            .ids()
            .iter()
            .copied()
            .filter(|id| !keep.contains(id))
            .collect();

        for &id in &lost {
            self.clear_feature(id);
        }
        if !lost.is_empty() {
            debug!("dropped {} lost features, {} remain", lost.len(), self.len_features());
        }
        lost.len()
    }

    pub fn feature_estimate(&self, id: FeatureId) -> Option<FeatureEstimate> {
        let slot = self.registry.global_to_local(id)?;
        Some(self.estimate_at(slot, id))
    }

    /// All tracked features in slot order.
    pub fn feature_estimates(&self) -> Vec<FeatureEstimate> {
        self.registry
            .iter()
            .map(|(slot, id)| self.estimate_at(slot, id))
            .collect()
    }

    fn estimate_at(&self, slot: usize, id: FeatureId) -> FeatureEstimate {
        let idx = StateLayout::feature_error(slot).inv_depth;
        FeatureEstimate {
            id,
            zeta: self.x.zeta(slot),
            inv_depth: self.x.inv_depth(slot),
            inv_depth_variance: self.p[(idx, idx)],
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Enforce the inverse-depth constraint on every feature.
    pub fn fix_depth(&mut self) -> DepthFixReport {
        let report = self.depth.enforce(&mut self.x, &mut self.p);
        if report.total() > 0 {
            debug!(
                "depth fixes: nan={} negative={} runaway={}",
                report.nan, report.negative, report.runaway
            );
        }
        report
    }

    /// Registry, state and covariance agree on the feature count, and the
    /// covariance is square.
    pub fn check_invariants(&self) -> bool {
        let n = self.registry.len();
        let layout = StateLayout::new(n);
        self.x.num_features() == n
            && self.x.len() == layout.state_dim()
            && self.p.nrows() == layout.error_dim()
            && self.p.ncols() == layout.error_dim()
            && n <= self.config.max_features
    }

    /// `x ← x ⊞ dx`.
    pub(super) fn apply_correction(&mut self, dx: &DVector<f64>) {
        self.x = self.x.boxplus(dx);
    }

    /// Diagonal of the process noise density for the current layout.
    pub(super) fn process_noise(&self) -> DVector<f64> {
        per_block(&self.config.qx, &self.config.qx_feat, self.len_features())
    }

    /// Partial-update weights for the current layout.
    pub(super) fn update_weights(&self) -> DVector<f64> {
        per_block(&self.config.lambda, &self.config.lambda_feat, self.len_features())
    }
}

/// Core values followed by the feature values repeated per slot.
fn per_block(core: &CoreErrorVector, feature: &Vector3<f64>, num_features: usize) -> DVector<f64> {
    let layout = StateLayout::new(num_features);
    let mut out = DVector::zeros(layout.error_dim());
    out.rows_mut(0, CORE_ERROR_DIM).copy_from(core);
    for slot in 0..num_features {
        let offset = StateLayout::feature_error(slot).bearing.offset;
        out.fixed_rows_mut::<FEATURE_ERROR_DIM>(offset).copy_from(feature);
    }
    out
}

/// `P ← (P + Pᵀ) / 2`.
pub(super) fn symmetrize(p: &mut DMatrix<f64>) {
    let pt = p.transpose();
    *p += pt;
    *p *= 0.5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn filter_with(max_features: usize) -> ViEkf {
        ViEkf::new(EkfConfig {
            max_features,
            ..EkfConfig::default()
        })
        .unwrap()
    }

    fn forward() -> Vector3<f64> {
        Vector3::new(0.0, 0.0, 1.0)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EkfConfig {
            max_features: 0,
            ..EkfConfig::default()
        };
        assert!(matches!(ViEkf::new(config), Err(FilterError::InvalidConfig(_))));
    }

    #[test]
    fn test_initial_covariance_is_p0() {
        let filter = filter_with(4);
        let config = EkfConfig::default();

        assert_eq!(filter.covariance().nrows(), 16);
        for i in 0..16 {
            assert_relative_eq!(filter.covariance()[(i, i)], config.p0[i]);
        }
        assert_relative_eq!(filter.core_covariance(), filter.covariance().fixed_view::<16, 16>(0, 0).into_owned());
    }

    #[test]
    fn test_init_feature_grows_state_and_covariance() {
        let mut filter = filter_with(4);
        let config = EkfConfig::default();

        let slot = filter.init_feature(FeatureId::new(42), &forward(), None).unwrap();

        assert_eq!(slot, 0);
        assert_eq!(filter.state().len(), 22);
        assert_eq!(filter.covariance().shape(), (19, 19));
        assert_relative_eq!(filter.covariance()[(16, 16)], config.p0_feat[0]);
        assert_relative_eq!(filter.covariance()[(18, 18)], config.p0_feat[2]);
        assert_eq!(filter.covariance()[(0, 16)], 0.0);
        assert_relative_eq!(filter.state().inv_depth(0), config.default_inverse_depth());
        assert_relative_eq!(filter.state().zeta(0), forward(), epsilon = 1e-12);
    }

    #[test]
    fn test_init_feature_uses_measured_depth() {
        let mut filter = filter_with(4);

        filter
            .init_feature(FeatureId::new(1), &Vector3::new(1.0, 0.0, 1.0), Some(4.0))
            .unwrap();
        filter
            .init_feature(FeatureId::new(2), &forward(), Some(-1.0))
            .unwrap();

        assert_relative_eq!(filter.state().inv_depth(0), 0.25);
        assert_relative_eq!(
            filter.state().inv_depth(1),
            filter.config().default_inverse_depth()
        );
    }

    #[test]
    fn test_init_feature_rejects_zero_bearing() {
        let mut filter = filter_with(4);

        let result = filter.init_feature(FeatureId::new(1), &Vector3::zeros(), None);

        assert!(matches!(result, Err(FilterError::InvalidMeasurement(_))));
        assert_eq!(filter.len_features(), 0);
        assert!(filter.check_invariants());
    }

    #[test]
    fn test_capacity_exhaustion_leaves_filter_unchanged() {
        let mut filter = filter_with(1);
        filter.init_feature(FeatureId::new(1), &forward(), None).unwrap();

        let result = filter.init_feature(FeatureId::new(2), &forward(), None);

        assert_eq!(result, Err(FilterError::CapacityExhausted { max: 1 }));
        assert_eq!(filter.state().len(), 22);
        assert_eq!(filter.covariance().nrows(), 19);
    }

    #[test]
    fn test_slot_lookup_after_clear() {
        let mut filter = filter_with(4);
        filter.init_feature(FeatureId::new(42), &forward(), None).unwrap();
        filter.init_feature(FeatureId::new(7), &forward(), Some(2.0)).unwrap();

        assert_eq!(filter.global_to_local(FeatureId::new(7)), Some(1));
        assert!(filter.clear_feature(FeatureId::new(42)));

        assert_eq!(filter.global_to_local(FeatureId::new(7)), Some(0));
        assert_eq!(filter.global_to_local(FeatureId::new(42)), None);
        assert_relative_eq!(filter.state().inv_depth(0), 0.5);
        assert!(!filter.clear_feature(FeatureId::new(42)));
        assert!(filter.check_invariants());
    }

    #[test]
    fn test_clear_feature_keeps_other_covariance_blocks() {
        let mut filter = filter_with(4);
        for id in 0..3 {
            filter.init_feature(FeatureId::new(id), &forward(), None).unwrap();
        }
        // Mark the cross-covariance between the core and the last feature.
        filter.p[(0, 16 + 6)] = 0.123;
        filter.p[(16 + 6, 0)] = 0.123;

        filter.clear_feature(FeatureId::new(1));

        assert_eq!(filter.covariance().nrows(), 22);
        assert_relative_eq!(filter.covariance()[(0, 16 + 3)], 0.123);
        assert_relative_eq!(filter.covariance()[(16 + 3, 0)], 0.123);
    }

    #[test]
    fn test_keep_only_features() {
        let mut filter = filter_with(8);
        for id in [10, 11, 12, 13] {
            filter.init_feature(FeatureId::new(id), &forward(), None).unwrap();
        }

        let removed = filter.keep_only_features(&[FeatureId::new(13), FeatureId::new(11)]);

        assert_eq!(removed, 2);
        assert_eq!(filter.feature_ids(), &[FeatureId::new(11), FeatureId::new(13)]);
        assert!(filter.check_invariants());
    }

    #[test]
    fn test_random_insert_remove_stays_consistent() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut filter = filter_with(10);
        let mut tracked: Vec<FeatureId> = Vec::new();

        for _ in 0..400 {
            let id = FeatureId::new(rng.gen_range(0..25));
            if rng.gen_bool(0.6) {
                let depth = rng.gen_range(0.5..10.0);
                match filter.init_feature(id, &forward(), Some(depth)) {
                    Ok(slot) => {
                        assert_eq!(slot, tracked.len());
                        tracked.push(id);
                    }
                    Err(FilterError::DuplicateFeature(dup)) => assert!(tracked.contains(&dup)),
                    Err(FilterError::CapacityExhausted { max }) => assert_eq!(tracked.len(), max),
                    Err(other) => panic!("unexpected error {}", other),
                }
            } else {
                let was_tracked = tracked.contains(&id);
                assert_eq!(filter.clear_feature(id), was_tracked);
                tracked.retain(|&t| t != id);
            }

            assert!(filter.check_invariants());
            assert_eq!(filter.feature_ids(), tracked.as_slice());
            for (slot, &id) in tracked.iter().enumerate() {
                assert_eq!(filter.global_to_local(id), Some(slot));
            }
        }
    }

    #[test]
    fn test_fix_depth_reaches_state() {
        let mut filter = ViEkf::new(EkfConfig {
            min_depth: 0.1,
            ..EkfConfig::default()
        })
        .unwrap();
        filter.init_feature(FeatureId::new(3), &forward(), None).unwrap();
        filter.x.set_inv_depth(0, -0.5);
        let before = filter.covariance()[(18, 18)];

        let report = filter.fix_depth();

        assert_eq!(report.negative, 1);
        assert_relative_eq!(filter.state().inv_depth(0), 5.0, epsilon = 1e-12);
        assert_relative_eq!(filter.covariance()[(18, 18)], before + 30.25, epsilon = 1e-12);
    }

    #[test]
    fn test_feature_estimates() {
        let mut filter = filter_with(4);
        filter
            .init_feature(FeatureId::new(9), &Vector3::new(0.0, 3.0, 4.0), Some(5.0))
            .unwrap();

        let estimate = filter.feature_estimate(FeatureId::new(9)).unwrap();

        assert_relative_eq!(estimate.inv_depth, 0.2);
        assert_relative_eq!(estimate.camera_point(), Vector3::new(0.0, 3.0, 4.0), epsilon = 1e-9);
        assert_eq!(filter.feature_estimates(), vec![estimate]);
        assert!(filter.feature_estimate(FeatureId::new(10)).is_none());
    }

    #[test]
    fn test_per_block_layout() {
        let core = CoreErrorVector::repeat(1.0);
        let v = per_block(&core, &Vector3::new(2.0, 3.0, 4.0), 2);

        assert_eq!(v.len(), 22);
        assert_eq!(v[15], 1.0);
        assert_eq!(v[16], 2.0);
        assert_eq!(v[18], 4.0);
        assert_eq!(v[21], 4.0);
    }
}
