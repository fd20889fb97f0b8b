//! Inequality constraint on feature inverse depths.
//!
//! After every update each inverse depth must be finite, non-negative and
//! bounded, following "Avoiding Negative Depth in Inverse Depth Bearing-Only
//! SLAM" (Parsley and Julier). Violations are repaired in place and never
//! reported as errors:
//!
//! ```text
//! ρ is NaN     ρ ← ρ₀                      variance untouched
//! ρ < 0        P += (ρ₀ - ρ)², ρ ← ρ₀      confidence drops with the violation
//! ρ > 100      P  = P0_feat,   ρ ← ρ₀      treated as lost observability
//! ```
//!
//! with `ρ₀ = 1 / (2 min_depth)`.

use nalgebra::DMatrix;
use tracing::debug;

use super::layout::StateLayout;
use super::state::State;

/// Inverse depths above this are treated as diverged.
pub const MAX_INVERSE_DEPTH: f64 = 1e2;

/// Which branch of the constraint fired for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFix {
    Unchanged,
    Nan,
    Negative,
    Runaway,
}

/// Per-branch counts from one enforcement pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DepthFixReport {
    pub nan: usize,
    pub negative: usize,
    pub runaway: usize,
}

impl DepthFixReport {
    pub fn total(&self) -> usize {
        self.nan + self.negative + self.runaway
    }

    fn record(&mut self, fix: DepthFix) {
        match fix {
            DepthFix::Unchanged => {}
            DepthFix::Nan => self.nan += 1,
            DepthFix::Negative => self.negative += 1,
            DepthFix::Runaway => self.runaway += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthConstraint {
    reset_inv_depth: f64,
    initial_variance: f64,
}

impl DepthConstraint {
    /// `initial_variance` is the configured initial inverse-depth variance.
    pub fn new(min_depth: f64, initial_variance: f64) -> Self {
        Self {
            reset_inv_depth: 1.0 / (2.0 * min_depth),
            initial_variance,
        }
    }

    pub fn reset_inv_depth(&self) -> f64 {
        self.reset_inv_depth
    }

    /// Constrain a single inverse depth and its variance.
    pub fn apply(&self, rho: &mut f64, variance: &mut f64) -> DepthFix {
        if rho.is_nan() {
            *rho = self.reset_inv_depth;
            DepthFix::Nan
        } else if *rho < 0.0 {
            let err = self.reset_inv_depth - *rho;
            *variance += err * err;
            *rho = self.reset_inv_depth;
            DepthFix::Negative
        } else if *rho > MAX_INVERSE_DEPTH {
            *variance = self.initial_variance;
            *rho = self.reset_inv_depth;
            DepthFix::Runaway
        } else {
            DepthFix::Unchanged
        }
    }

    /// Constrain every feature of `state`; `cov` is the matching error covariance.
    pub fn enforce(&self, state: &mut State, cov: &mut DMatrix<f64>) -> DepthFixReport {
        debug_assert_eq!(cov.nrows(), state.layout().error_dim());

        let mut report = DepthFixReport::default();
        for slot in 0..state.num_features() {
            let idx = StateLayout::feature_error(slot).inv_depth;
            let mut rho = state.inv_depth(slot);
            let mut variance = cov[(idx, idx)];

            let fix = self.apply(&mut rho, &mut variance);
            if fix != DepthFix::Unchanged {
                debug!(slot, ?fix, rho, variance, "inverse depth constrained");
                state.set_inv_depth(slot, rho);
                cov[(idx, idx)] = variance;
            }
            report.record(fix);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EkfConfig;
    use crate::geometry::Quat;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn constraint() -> DepthConstraint {
        DepthConstraint::new(0.1, 0.3)
    }

    #[test]
    fn test_negative_depth_scenario() {
        let mut rho = -0.5;
        let mut variance = 0.2;

        let fix = constraint().apply(&mut rho, &mut variance);

        assert_eq!(fix, DepthFix::Negative);
        assert_relative_eq!(rho, 5.0, epsilon = 1e-12);
        assert_relative_eq!(variance, 0.2 + 5.5 * 5.5, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_depth_keeps_variance() {
        let mut rho = f64::NAN;
        let mut variance = 0.2;

        assert_eq!(constraint().apply(&mut rho, &mut variance), DepthFix::Nan);
        assert_relative_eq!(rho, 5.0, epsilon = 1e-12);
        assert_eq!(variance, 0.2);
    }

    #[test]
    fn test_runaway_depth_resets_variance() {
        let mut rho = 150.0;
        let mut variance = 1e-6;

        assert_eq!(constraint().apply(&mut rho, &mut variance), DepthFix::Runaway);
        assert_relative_eq!(rho, 5.0, epsilon = 1e-12);
        assert_eq!(variance, 0.3);
    }

    #[test]
    fn test_valid_depths_untouched() {
        for value in [0.0, 1e-6, 0.7, 42.0, MAX_INVERSE_DEPTH] {
            let mut rho = value;
            let mut variance = 0.05;

            assert_eq!(constraint().apply(&mut rho, &mut variance), DepthFix::Unchanged);
            assert_eq!(rho, value);
            assert_eq!(variance, 0.05);
        }
    }

    #[test]
    fn test_enforce_touches_only_depth_diagonal() {
        let mut state = State::from_core(&EkfConfig::default().x0);
        let q = Quat::from_bearing(&Vector3::new(0.0, 0.0, 1.0));
        state.push_feature(&q, 0.4);
        state.push_feature(&q, -0.5);
        state.push_feature(&q, f64::NAN);
        state.push_feature(&q, 250.0);
        let dim = state.layout().error_dim();
        let mut cov = DMatrix::from_element(dim, dim, 0.01);

        let report = constraint().enforce(&mut state, &mut cov);

        assert_eq!(
            report,
            DepthFixReport {
                nan: 1,
                negative: 1,
                runaway: 1
            }
        );
        assert_eq!(report.total(), 3);
        assert_relative_eq!(state.inv_depth(0), 0.4);
        for slot in 1..4 {
            assert_relative_eq!(state.inv_depth(slot), 5.0, epsilon = 1e-12);
        }
        let idx = |slot| StateLayout::feature_error(slot).inv_depth;
        assert_relative_eq!(cov[(idx(1), idx(1))], 0.01 + 5.5 * 5.5, epsilon = 1e-12);
        assert_eq!(cov[(idx(2), idx(2))], 0.01);
        assert_eq!(cov[(idx(3), idx(3))], 0.3);
        assert_eq!(cov[(idx(1), idx(2))], 0.01);
    }
}
