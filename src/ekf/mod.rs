//! Error-state EKF over a keyframe-relative body state and a bounded set of
//! bearing/inverse-depth features.
//!
//! - [`layout`]: offsets of every block in the nominal and error state
//! - [`state`]: nominal state with `boxplus` / `boxminus`
//! - [`registry`]: global feature id ↔ dense local slot
//! - [`depth`]: inverse-depth inequality constraint
//! - [`filter`]: the [`ViEkf`] context and feature lifecycle
//! - [`propagation`]: IMU integration and covariance propagation
//! - [`update`]: measurement models and the Kalman update
//! - [`keyframe`]: keyframe resets and global pose composition

pub mod depth;
pub mod filter;
pub mod keyframe;
pub mod layout;
pub mod propagation;
pub mod registry;
pub mod state;
pub mod types;
pub mod update;

pub use depth::{DepthConstraint, DepthFix, DepthFixReport, MAX_INVERSE_DEPTH};
pub use filter::{CoreCovariance, FeatureEstimate, ViEkf};
pub use keyframe::KeyframeGraph;
pub use layout::{CoreBlock, StateLayout, CORE_ERROR_DIM, CORE_STATE_DIM};
pub use propagation::Kinematics;
pub use registry::FeatureRegistry;
pub use state::State;
pub use types::FeatureId;
pub use update::{Measurement, UpdateOutcome};
