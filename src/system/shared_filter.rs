//! Filter shared between the estimator worker and readers.
//!
//! The worker takes the write lock for a whole propagate, frame update or
//! keyframe reset, so readers always see a state, covariance and registry
//! that agree with each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ekf::{CoreCovariance, ViEkf};
use crate::geometry::Xform;

use super::messages::{FeatureEstimate, OdometryEstimate};

pub struct SharedFilter {
    /// Written only by the estimator worker.
    filter: RwLock<ViEkf>,

    /// Ask the worker to drain its queue and exit.
    shutdown_requested: AtomicBool,
}

impl SharedFilter {
    pub fn new(filter: ViEkf) -> Arc<Self> {
        Arc::new(Self {
            filter: RwLock::new(filter),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ViEkf> {
        self.filter.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ViEkf> {
        self.filter.write()
    }

    pub fn global_pose(&self) -> Xform {
        self.filter.read().global_pose()
    }

    pub fn core_covariance(&self) -> CoreCovariance {
        self.filter.read().core_covariance()
    }

    pub fn feature_estimates(&self) -> Vec<FeatureEstimate> {
        self.filter.read().feature_estimates()
    }

    /// Consistent snapshot of the body state under one read lock.
    pub fn odometry(&self) -> OdometryEstimate {
        let filter = self.filter.read();
        OdometryEstimate {
            timestamp_s: filter.last_imu_time().unwrap_or(0.0),
            pose: filter.global_pose(),
            velocity: filter.state().velocity(),
            bias: filter.state().biases(),
            covariance: filter.core_covariance(),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EkfConfig;
    use crate::ekf::FeatureId;
    use nalgebra::Vector3;
    use std::thread;

    #[test]
    fn test_readers_see_writer_changes() {
        let shared = SharedFilter::new(ViEkf::new(EkfConfig::default()).unwrap());

        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut filter = shared.write();
                filter
                    .init_feature(FeatureId::new(4), &Vector3::new(0.0, 0.0, 1.0), Some(2.0))
                    .unwrap();
            })
        };
        writer.join().unwrap();

        let features = shared.feature_estimates();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id, FeatureId::new(4));
        assert_eq!(shared.odometry().pose, Xform::identity());
        assert!(shared.read().check_invariants());
    }

    #[test]
    fn test_shutdown_flag() {
        let shared = SharedFilter::new(ViEkf::new(EkfConfig::default()).unwrap());
        assert!(!shared.is_shutdown_requested());

        shared.request_shutdown();

        assert!(shared.is_shutdown_requested());
    }
}
