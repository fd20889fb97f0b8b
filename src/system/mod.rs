//! Estimator service: one worker thread owning the filter, fed by producers
//! over a bounded channel, with readers served from a shared lock.

mod estimator;
pub mod messages;
pub mod shared_filter;

pub use estimator::{Estimator, EstimatorConfig, EstimatorStats, FeatureSender, ImuSender};
pub use messages::{
    FeatureEstimate, FeatureFrame, FeatureObservation, FilterInput, OdometryEstimate, TruthSample,
};
pub use shared_filter::SharedFilter;
