//! Estimator: the single writer of the filter.
//!
//! One worker thread owns every mutation of the [`SharedFilter`]. Producers
//! (IMU driver, feature tracker, truth source) push [`FilterInput`]s into a
//! bounded channel through cloned senders; readers query the shared filter
//! under its read lock. An error on one input is logged and the worker moves
//! on to the next.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::ekf::{Measurement, ViEkf};
use crate::error::{FilterError, Result};
use crate::imu::ImuSample;

use super::messages::{FeatureFrame, FilterInput, OdometryEstimate, TruthSample};
use super::shared_filter::SharedFilter;

/// Timeout for receiving inputs, bounding shutdown latency.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Capacity of the input channel. Producers block when it is full.
    pub input_capacity: usize,

    /// Capacity of the odometry output channel. Estimates are dropped when
    /// nobody drains it.
    pub output_capacity: usize,

    /// Fuse truth samples as position/attitude/velocity measurements.
    pub use_truth: bool,

    /// Fuse measured feature depths.
    pub use_depth: bool,

    /// Compute residuals without applying them (diagnostics only).
    pub passive_updates: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            input_capacity: 256,
            output_capacity: 64,
            use_truth: false,
            use_depth: true,
            passive_updates: false,
        }
    }
}

/// Counters kept by the worker, returned on shutdown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EstimatorStats {
    pub imu_samples: usize,
    pub frames: usize,
    pub features_initialized: usize,
    /// Observations skipped because every slot was in use.
    pub features_rejected: usize,
    pub features_dropped: usize,
    pub updates: usize,
    pub failed_inputs: usize,
    pub keyframe_resets: usize,
    pub depth_fixes: usize,
}

/// Sender handed to the IMU producer.
#[derive(Clone)]
pub struct ImuSender(Sender<FilterInput>);

impl ImuSender {
    pub fn send(&self, sample: ImuSample) -> Result<()> {
        self.0
            .send(FilterInput::Imu(sample))
            .map_err(|_| FilterError::Disconnected)
    }
}

/// Sender handed to the feature tracker.
#[derive(Clone)]
pub struct FeatureSender(Sender<FilterInput>);

impl FeatureSender {
    pub fn send(&self, frame: FeatureFrame) -> Result<()> {
        self.0
            .send(FilterInput::Features(frame))
            .map_err(|_| FilterError::Disconnected)
    }
}

pub struct Estimator {
    shared: Arc<SharedFilter>,

    /// Dropped on shutdown so the worker sees a disconnect once producers finish.
    sender: Option<Sender<FilterInput>>,

    odometry: Receiver<OdometryEstimate>,

    worker: Option<JoinHandle<EstimatorStats>>,
}

impl Estimator {
    /// Wrap `filter` and spawn the worker thread.
    pub fn new(filter: ViEkf, config: EstimatorConfig) -> Self {
        let shared = SharedFilter::new(filter);
        let (sender, receiver) = bounded::<FilterInput>(config.input_capacity);
        let (odometry_sender, odometry) = bounded::<OdometryEstimate>(config.output_capacity);

        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || Worker::new(shared, config, odometry_sender).run(receiver))
        };

        Self {
            shared,
            sender: Some(sender),
            odometry,
            worker: Some(worker),
        }
    }

    pub fn shared(&self) -> &Arc<SharedFilter> {
        &self.shared
    }

    fn channel(&self) -> Result<Sender<FilterInput>> {
        self.sender.clone().ok_or(FilterError::Disconnected)
    }

    pub fn imu_sender(&self) -> Result<ImuSender> {
        self.channel().map(ImuSender)
    }

    pub fn feature_sender(&self) -> Result<FeatureSender> {
        self.channel().map(FeatureSender)
    }

    /// Queue any input, blocking while the channel is full.
    pub fn submit(&self, input: FilterInput) -> Result<()> {
        self.sender
            .as_ref()
            .ok_or(FilterError::Disconnected)?
            .send(input)
            .map_err(|_| FilterError::Disconnected)
    }

    /// Odometry published after every feature frame.
    pub fn odometry_receiver(&self) -> Receiver<OdometryEstimate> {
        self.odometry.clone()
    }

    /// Process what is already queued, stop the worker and return its counters.
    ///
    /// Returns `None` when the worker was already stopped.
    pub fn shutdown(&mut self) -> Option<EstimatorStats> {
        self.sender = None;
        self.shared.request_shutdown();

        let handle = self.worker.take()?;
        match handle.join() {
            Ok(stats) => {
                info!("estimator stopped: {:?}", stats);
                Some(stats)
            }
            Err(_) => {
                warn!("estimator worker panicked");
                None
            }
        }
    }
}

impl Drop for Estimator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    shared: Arc<SharedFilter>,
    config: EstimatorConfig,
    odometry: Sender<OdometryEstimate>,
    stats: EstimatorStats,
}

impl Worker {
    fn new(shared: Arc<SharedFilter>, config: EstimatorConfig, odometry: Sender<OdometryEstimate>) -> Self {
        Self {
            shared,
            config,
            odometry,
            stats: EstimatorStats::default(),
        }
    }

    fn run(mut self, receiver: Receiver<FilterInput>) -> EstimatorStats {
        info!("estimator worker started");

        loop {
            if self.shared.is_shutdown_requested() {
                let pending = receiver.len();
                for input in receiver.try_iter().take(pending) {
                    self.handle(input);
                }
                break;
            }

            match receiver.recv_timeout(RECV_TIMEOUT) {
                Ok(input) => self.handle(input),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(
            "estimator worker exiting after {} IMU samples and {} frames",
            self.stats.imu_samples, self.stats.frames
        );
        self.stats
    }

    fn handle(&mut self, input: FilterInput) {
        let result = match input {
            FilterInput::Imu(sample) => self.on_imu(&sample),
            FilterInput::Features(frame) => self.on_features(&frame),
            FilterInput::Truth(truth) => self.on_truth(&truth),
            FilterInput::Altitude { altitude, .. } => {
                let shared = Arc::clone(&self.shared);
                let mut filter = shared.write();
                self.apply(&mut filter, &Measurement::Altitude(altitude))
            }
            FilterInput::KeyframeReset => {
                self.shared.write().keyframe_reset();
                self.stats.keyframe_resets += 1;
                Ok(())
            }
        };

        if let Err(e) = result {
            self.stats.failed_inputs += 1;
            warn!("input dropped: {}", e);
        }
    }

    fn on_imu(&mut self, sample: &ImuSample) -> Result<()> {
        let report = self.shared.write().propagate(sample)?;
        self.stats.imu_samples += 1;
        self.stats.depth_fixes += report.total();
        Ok(())
    }

    fn on_features(&mut self, frame: &FeatureFrame) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let mut filter = shared.write();

        self.stats.features_dropped += filter.keep_only_features(&frame.ids());

        let mut rejected = 0;
        for obs in &frame.observations {
            if !filter.is_tracking(obs.id) {
                match filter.init_feature(obs.id, &obs.zeta, obs.depth) {
                    Ok(_) => self.stats.features_initialized += 1,
                    Err(FilterError::CapacityExhausted { .. }) => rejected += 1,
                    Err(e) => warn!("feature {} not initialized: {}", obs.id, e),
                }
                continue;
            }

            let direction = match obs.pixel {
                Some(uv) => Measurement::Pixel { id: obs.id, uv },
                None => Measurement::Bearing {
                    id: obs.id,
                    zeta: obs.zeta,
                },
            };
            if let Err(e) = self.apply(&mut filter, &direction) {
                warn!("{} update for {} failed: {}", direction.name(), obs.id, e);
            }
            if let (true, Some(depth)) = (self.config.use_depth, obs.depth) {
                if let Err(e) = self.apply(&mut filter, &Measurement::Depth { id: obs.id, depth }) {
                    warn!("depth update for {} failed: {}", obs.id, e);
                }
            }
        }
        if rejected > 0 {
            self.stats.features_rejected += rejected;
            warn!(
                "feature capacity exhausted at t={:.3}: {} new observations skipped",
                frame.timestamp_s, rejected
            );
        }

        if filter.update_keyframe().is_some() {
            self.stats.keyframe_resets += 1;
        }
        self.stats.frames += 1;

        let estimate = OdometryEstimate {
            timestamp_s: frame.timestamp_s,
            pose: filter.global_pose(),
            velocity: filter.state().velocity(),
            bias: filter.state().biases(),
            covariance: filter.core_covariance(),
        };
        drop(filter);

        // Nobody draining the output is not an error.
        let _ = self.odometry.try_send(estimate);
        debug!("frame t={:.3} processed", frame.timestamp_s);
        Ok(())
    }

    fn on_truth(&mut self, truth: &TruthSample) -> Result<()> {
        if !self.config.use_truth {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let mut filter = shared.write();
        let relative = filter.keyframe_pose().inverse().compose(&truth.pose);

        self.apply(&mut filter, &Measurement::Position(relative.t))?;
        self.apply(&mut filter, &Measurement::Attitude(relative.q))?;
        if let Some(velocity) = truth.velocity {
            self.apply(&mut filter, &Measurement::Velocity(velocity))?;
        }
        Ok(())
    }

    fn apply(&mut self, filter: &mut ViEkf, measurement: &Measurement) -> Result<()> {
        let outcome = filter.update(measurement, self.config.passive_updates)?;
        self.stats.updates += 1;
        self.stats.depth_fixes += outcome.depth_fixes.total();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EkfConfig;
    use crate::ekf::CoreBlock;
    use crate::sim::{Scenario, ScenarioConfig};
    use crate::system::messages::FeatureObservation;
    use nalgebra::Vector3;

    fn scenario(imu_rate_hz: f64) -> Scenario {
        let config = ScenarioConfig {
            imu_rate_hz,
            ..ScenarioConfig::default()
        };
        Scenario::new(config, &EkfConfig::default())
    }

    fn estimator(scenario: &Scenario, config: EstimatorConfig) -> Estimator {
        let filter_config = scenario.initial_config(EkfConfig {
            max_features: 10,
            ..EkfConfig::default()
        });
        Estimator::new(ViEkf::new(filter_config).unwrap(), config)
    }

    /// IMU samples and frames merged in timestamp order, IMU first on ties.
    fn merged_inputs(scenario: &Scenario, duration: f64) -> Vec<FilterInput> {
        let mut inputs: Vec<(f64, u8, FilterInput)> = scenario
            .imu_samples(duration)
            .into_iter()
            .map(|s| (s.timestamp_s, 0, FilterInput::Imu(s)))
            .chain(
                scenario
                    .frames(duration)
                    .into_iter()
                    .map(|f| (f.timestamp_s, 1, FilterInput::Features(f))),
            )
            .collect();
        inputs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        inputs.into_iter().map(|(_, _, input)| input).collect()
    }

    #[test]
    fn test_concurrent_producers() {
        let s = scenario(100.0);
        let imu_samples = s.imu_samples(1.0);
        let frames = s.frames(1.0);
        let (num_imu, num_frames) = (imu_samples.len(), frames.len());
        let mut estimator = estimator(&s, EstimatorConfig::default());

        let imu_producer = {
            let sender = estimator.imu_sender().unwrap();
            thread::spawn(move || {
                for sample in imu_samples {
                    sender.send(sample).unwrap();
                }
            })
        };
        let feature_producer = {
            let sender = estimator.feature_sender().unwrap();
            thread::spawn(move || {
                for frame in frames {
                    sender.send(frame).unwrap();
                }
            })
        };
        imu_producer.join().unwrap();
        feature_producer.join().unwrap();

        let shared = Arc::clone(estimator.shared());
        let stats = estimator.shutdown().unwrap();

        assert_eq!(stats.imu_samples, num_imu);
        assert_eq!(stats.frames, num_frames);
        assert_eq!(stats.failed_inputs, 0);
        assert!(stats.features_initialized > 0);
        assert!(shared.read().check_invariants());
    }

    #[test]
    fn test_tracks_truth() {
        let s = scenario(100.0);
        let duration = 2.0;
        let mut estimator = estimator(&s, EstimatorConfig::default());
        let odometry = estimator.odometry_receiver();

        for input in merged_inputs(&s, duration) {
            estimator.submit(input).unwrap();
        }
        let shared = Arc::clone(estimator.shared());
        let stats = estimator.shutdown().unwrap();

        assert_eq!(stats.failed_inputs, 0);
        assert!(stats.updates > 0);
        let pose = shared.global_pose();
        let truth = s.pose(duration);
        assert!((pose.t - truth.t).norm() < 0.5);
        assert!(shared.read().check_invariants());
        assert!(shared.read().len_features() <= 10);

        let published: Vec<_> = odometry.try_iter().collect();
        assert!(!published.is_empty());
        assert!(published
            .windows(2)
            .all(|w| w[0].timestamp_s < w[1].timestamp_s));
    }

    #[test]
    fn test_bearings_correct_velocity() {
        let s = scenario(100.0);
        let duration = 4.0;
        let offset = Vector3::new(0.2, -0.15, 0.1);
        let mut filter_config = s.initial_config(EkfConfig {
            max_features: 10,
            ..EkfConfig::default()
        });
        let velocity = CoreBlock::Velocity.state().offset;
        filter_config
            .p0
            .fixed_rows_mut::<3>(CoreBlock::Velocity.error().offset)
            .fill(0.1);
        let mut perturbed = filter_config.x0.fixed_rows::<3>(velocity).into_owned();
        perturbed += offset;
        filter_config.x0.fixed_rows_mut::<3>(velocity).copy_from(&perturbed);
        let mut estimator = Estimator::new(ViEkf::new(filter_config).unwrap(), EstimatorConfig::default());

        for input in merged_inputs(&s, duration) {
            estimator.submit(input).unwrap();
        }
        let shared = Arc::clone(estimator.shared());
        let stats = estimator.shutdown().unwrap();

        assert_eq!(stats.failed_inputs, 0);
        let truth = s.truth(duration).velocity.unwrap();
        let error = (shared.read().state().velocity() - truth).norm();
        assert!(error < 0.5 * offset.norm(), "velocity error {} not reduced", error);
    }

    #[test]
    fn test_tracks_truth_from_pixels() {
        let s = scenario(100.0);
        let duration = 2.0;
        let camera = EkfConfig::default().camera();
        let mut estimator = estimator(&s, EstimatorConfig::default());

        for input in merged_inputs(&s, duration) {
            let input = match input {
                FilterInput::Features(mut frame) => {
                    frame.observations = frame
                        .observations
                        .iter()
                        .filter_map(|obs| {
                            let uv = camera.project(&obs.zeta)?;
                            Some(FeatureObservation::from_pixel(obs.id, &uv, obs.depth, &camera))
                        })
                        .collect();
                    FilterInput::Features(frame)
                }
                other => other,
            };
            estimator.submit(input).unwrap();
        }
        let shared = Arc::clone(estimator.shared());
        let stats = estimator.shutdown().unwrap();

        assert_eq!(stats.failed_inputs, 0);
        assert!(stats.updates > 0);
        assert!((shared.global_pose().t - s.pose(duration).t).norm() < 0.5);
        assert!(shared.read().check_invariants());
    }

    #[test]
    fn test_non_monotonic_imu_counts_as_failure() {
        let s = scenario(100.0);
        let mut estimator = estimator(&s, EstimatorConfig::default());

        estimator.submit(FilterInput::Imu(s.imu(0.1))).unwrap();
        estimator.submit(FilterInput::Imu(s.imu(0.05))).unwrap();
        estimator.submit(FilterInput::Imu(s.imu(0.2))).unwrap();
        let stats = estimator.shutdown().unwrap();

        assert_eq!(stats.imu_samples, 2);
        assert_eq!(stats.failed_inputs, 1);
    }

    #[test]
    fn test_truth_and_keyframe_inputs() {
        let s = scenario(100.0);
        let config = EstimatorConfig {
            use_truth: true,
            ..EstimatorConfig::default()
        };
        let mut estimator = estimator(&s, config);

        estimator.submit(FilterInput::Truth(s.truth(0.0))).unwrap();
        estimator.submit(FilterInput::KeyframeReset).unwrap();
        estimator
            .submit(FilterInput::Altitude {
                timestamp_s: 0.0,
                altitude: 1.5,
            })
            .unwrap();
        let shared = Arc::clone(estimator.shared());
        let stats = estimator.shutdown().unwrap();

        assert_eq!(stats.updates, 4);
        assert_eq!(stats.keyframe_resets, 1);
        assert_eq!(stats.failed_inputs, 0);
        let pose = shared.global_pose();
        assert!((pose.t - s.pose(0.0).t).norm() < 1e-6);
    }

    #[test]
    fn test_ignores_truth_by_default() {
        let s = scenario(100.0);
        let mut estimator = estimator(&s, EstimatorConfig::default());

        estimator.submit(FilterInput::Truth(s.truth(0.0))).unwrap();
        let stats = estimator.shutdown().unwrap();

        assert_eq!(stats.updates, 0);
    }

    #[test]
    fn test_senders_fail_after_shutdown() {
        let s = scenario(100.0);
        let mut estimator = estimator(&s, EstimatorConfig::default());
        let sender = estimator.imu_sender().unwrap();

        assert!(estimator.shutdown().is_some());

        assert!(matches!(estimator.imu_sender(), Err(FilterError::Disconnected)));
        assert!(matches!(
            estimator.submit(FilterInput::KeyframeReset),
            Err(FilterError::Disconnected)
        ));
        assert!(matches!(sender.send(s.imu(0.0)), Err(FilterError::Disconnected)));
        assert!(estimator.shutdown().is_none());
    }
}
