//! Keyframes and global pose composition.
//!
//! Position and attitude in the filter are relative to the current keyframe.
//! The global pose is `keyframe_pose ∘ relative`. A keyframe reset moves the
//! unobservable planar part of the relative pose (x, y, yaw) into the
//! keyframe pose and re-zeroes it in the state, so the filter never carries
//! unbounded global drift in its linearization point.

use nalgebra::{DMatrix, Matrix3, Vector3};
use tracing::info;

use crate::geometry::{Quat, Se2, Xform, E_Z};

use super::filter::{symmetrize, ViEkf};
use super::layout::CoreBlock;

/// Chain of planar edges between consecutive keyframes.
#[derive(Debug, Clone)]
pub struct KeyframeGraph {
    edges: Vec<Se2>,
    /// `poses[i]` is the planar global pose of keyframe `i`.
    poses: Vec<Se2>,
}

impl Default for KeyframeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyframeGraph {
    /// Graph holding only the origin keyframe.
    pub fn new() -> Self {
        Self {
            edges: Vec::new(),
            poses: vec![Se2::identity()],
        }
    }

    /// Number of keyframes, including the origin.
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn edges(&self) -> &[Se2] {
        &self.edges
    }

    /// Append a keyframe reached from the latest one through `edge`.
    /// Returns its index.
    pub fn push(&mut self, edge: Se2) -> usize {
        let pose = self.latest().concatenate(&edge);
        self.edges.push(edge);
        self.poses.push(pose);
        self.poses.len() - 1
    }

    pub fn planar_pose(&self, index: usize) -> Option<Se2> {
        self.poses.get(index).copied()
    }

    pub fn latest(&self) -> Se2 {
        self.poses.last().copied().unwrap_or_default()
    }

    /// Pose of keyframe `to` expressed in the frame of keyframe `from`.
    pub fn edge_between(&self, from: usize, to: usize) -> Option<Se2> {
        let a = self.planar_pose(from)?;
        let b = self.planar_pose(to)?;
        Some(a.inverse().concatenate(&b))
    }
}

impl ViEkf {
    /// Global pose of the body: `keyframe_pose ∘ (position, attitude)`.
    pub fn global_pose(&self) -> Xform {
        self.keyframe_pose.compose(&self.x.relative_pose())
    }

    pub fn keyframe_pose(&self) -> &Xform {
        &self.keyframe_pose
    }

    pub fn keyframe_graph(&self) -> &KeyframeGraph {
        &self.keyframes
    }

    /// Fraction of the keyframe's features that are still tracked
    /// (1.0 while the keyframe has none).
    pub fn keyframe_overlap_ratio(&self) -> f64 {
        if self.keyframe_features.is_empty() {
            return 1.0;
        }
        let still_tracked = self
            .keyframe_features
            .iter()
            .filter(|&&id| self.registry.contains(id))
            .count();
        still_tracked as f64 / self.keyframe_features.len() as f64
    }

    pub fn needs_keyframe_reset(&self) -> bool {
        self.config.keyframe_reset
            && !self.keyframe_features.is_empty()
            && self.keyframe_overlap_ratio() < self.config.keyframe_overlap
    }

    /// Move x, y and yaw of the relative pose into the keyframe pose.
    ///
    /// The global pose is unchanged. Returns the planar edge from the old
    /// keyframe to the new one.
    pub fn keyframe_reset(&mut self) -> Se2 {
        let p = self.x.position();
        let q = self.x.attitude();
        let yaw = q.yaw();
        let q_yaw = Quat::from_yaw(yaw);
        let edge = Se2::new(p.x, p.y, yaw);

        self.keyframe_pose = self.keyframe_pose.compose(&Xform::from_se2(&edge));
        self.x.set_position(&Vector3::new(0.0, 0.0, p.z));
        self.x.set_attitude(&(q_yaw.inverse() * q));

        // Heading perturbation in the body frame of the attitude error.
        let u = q.rotate_passive(&E_Z);
        let yaw_direction = u * u.transpose();
        let pos = CoreBlock::Position.error().offset;
        let att = CoreBlock::Attitude.error().offset;

        let n = self.p.nrows();
        let mut a = DMatrix::<f64>::identity(n, n);
        a[(pos, pos)] = 0.0;
        a[(pos + 1, pos + 1)] = 0.0;
        a.fixed_view_mut::<3, 3>(att, att)
            .copy_from(&(Matrix3::identity() - yaw_direction));
        self.p = &a * &self.p * a.transpose();

        // Re-seed the removed directions with their initial uncertainty.
        self.p[(pos, pos)] += self.config.p0[pos];
        self.p[(pos + 1, pos + 1)] += self.config.p0[pos + 1];
        let mut att_block = self.p.fixed_view_mut::<3, 3>(att, att);
        att_block += yaw_direction * self.config.p0[att + 2];
        symmetrize(&mut self.p);

        let index = self.keyframes.push(edge);
        self.keyframe_features = self.registry.ids().to_vec();
        info!(
            "keyframe {} declared: edge=({:.3}, {:.3}, {:.3}), {} features",
            index,
            edge.x,
            edge.y,
            edge.heading,
            self.keyframe_features.len()
        );
        edge
    }

    /// Record the keyframe's feature set if it has none yet, otherwise reset
    /// when too few of them remain. Returns the edge when a reset happened.
    pub fn update_keyframe(&mut self) -> Option<Se2> {
        if self.keyframe_features.is_empty() {
            self.keyframe_features = self.registry.ids().to_vec();
            return None;
        }
        if self.needs_keyframe_reset() {
            Some(self.keyframe_reset())
        } else {
            None
        }
    }
}
