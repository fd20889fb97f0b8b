//! Circular flight past a ring of landmarks.
//!
//! The body flies a level circle at constant speed and height, nose along
//! the direction of travel, inside a cylindrical wall of landmarks. IMU
//! samples are noise-free and follow the filter's conventions: z-down world,
//! body-frame velocity, specific force `f = ω × v − q⁻¹ g` for the constant
//! body velocity of a coordinated turn.

use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra::Vector3;

use crate::config::EkfConfig;
use crate::ekf::layout::CoreBlock;
use crate::ekf::FeatureId;
use crate::geometry::{Quat, Xform};
use crate::imu::{ImuSample, GRAVITY};
use crate::system::messages::{FeatureFrame, FeatureObservation, TruthSample};

/// Golden angle, spreads landmarks evenly around the wall.
const GOLDEN_ANGLE: f64 = PI * 0.763_932_022_500_210_3;

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Radius of the flight circle (m).
    pub radius: f64,
    /// Height above the origin (m).
    pub height: f64,
    /// Ground speed (m/s).
    pub speed: f64,
    pub imu_rate_hz: f64,
    pub camera_rate_hz: f64,
    pub num_landmarks: usize,
    /// Radius of the landmark wall (m).
    pub wall_radius: f64,
    /// Landmark heights span `[0, wall_height]`.
    pub wall_height: f64,
    /// Full field of view of the camera (rad).
    pub field_of_view: f64,
    /// At most this many observations per frame, lowest ids first.
    pub max_observations: usize,
    /// Attach the true range to every observation.
    pub provide_depth: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            radius: 3.0,
            height: 1.5,
            speed: 1.0,
            imu_rate_hz: 200.0,
            camera_rate_hz: 20.0,
            num_landmarks: 200,
            wall_radius: 8.0,
            wall_height: 3.0,
            field_of_view: 90f64.to_radians(),
            max_observations: 20,
            provide_depth: true,
        }
    }
}

pub struct Scenario {
    config: ScenarioConfig,
    landmarks: Vec<Vector3<f64>>,
    /// Camera extrinsics, body ← camera.
    t_b_c: Xform,
}

impl Scenario {
    /// Scenario observed through the camera extrinsics of `filter_config`.
    pub fn new(config: ScenarioConfig, filter_config: &EkfConfig) -> Self {
        let landmarks = (0..config.num_landmarks)
            .map(|i| {
                let angle = i as f64 * GOLDEN_ANGLE;
                let level = (i as f64 * 0.618_033_988_749_895).fract();
                Vector3::new(
                    config.wall_radius * angle.cos(),
                    config.wall_radius * angle.sin(),
                    -config.wall_height * level,
                )
            })
            .collect();

        Self {
            t_b_c: Xform::new(filter_config.p_b_c, Quat::from_vector(&filter_config.q_b_c)),
            config,
            landmarks,
        }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn landmarks(&self) -> &[Vector3<f64>] {
        &self.landmarks
    }

    fn yaw_rate(&self) -> f64 {
        self.config.speed / self.config.radius
    }

    fn body_velocity(&self) -> Vector3<f64> {
        Vector3::new(self.config.speed, 0.0, 0.0)
    }

    fn body_rate(&self) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, self.yaw_rate())
    }

    /// Global body pose at time `t`.
    pub fn pose(&self, t: f64) -> Xform {
        let phase = self.yaw_rate() * t;
        Xform::new(
            Vector3::new(
                self.config.radius * phase.cos(),
                self.config.radius * phase.sin(),
                -self.config.height,
            ),
            Quat::from_yaw(phase + FRAC_PI_2),
        )
    }

    pub fn truth(&self, t: f64) -> TruthSample {
        TruthSample {
            timestamp_s: t,
            pose: self.pose(t),
            velocity: Some(self.body_velocity()),
        }
    }

    pub fn imu(&self, t: f64) -> ImuSample {
        let q = self.pose(t).q;
        let accel = self.body_rate().cross(&self.body_velocity()) - q.rotate_passive(&GRAVITY);
        ImuSample::new(t, accel, self.body_rate())
    }

    /// Features visible from the camera at time `t`.
    pub fn observe(&self, t: f64) -> FeatureFrame {
        let t_w_c = self.pose(t).compose(&self.t_b_c);
        let min_cos = (self.config.field_of_view / 2.0).cos();

        let observations = self
            .landmarks
            .iter()
            .enumerate()
            .filter_map(|(i, landmark)| {
                let p_c = t_w_c.inverse_transform_point(landmark);
                let range = p_c.norm();
                if p_c.z <= 0.0 || p_c.z / range < min_cos {
                    return None;
                }
                Some(FeatureObservation {
                    id: FeatureId::new(i as u64),
                    zeta: p_c / range,
                    depth: self.config.provide_depth.then_some(range),
                    pixel: None,
                })
            })
            .take(self.config.max_observations)
            .collect();

        FeatureFrame {
            timestamp_s: t,
            observations,
        }
    }

    /// IMU samples over `[0, duration]`.
    pub fn imu_samples(&self, duration: f64) -> Vec<ImuSample> {
        sample_times(self.config.imu_rate_hz, duration)
            .map(|t| self.imu(t))
            .collect()
    }

    /// Camera frames over `[0, duration]`.
    pub fn frames(&self, duration: f64) -> Vec<FeatureFrame> {
        sample_times(self.config.camera_rate_hz, duration)
            .map(|t| self.observe(t))
            .collect()
    }

    /// `base` with the initial state set to the true state at `t = 0`.
    pub fn initial_config(&self, base: EkfConfig) -> EkfConfig {
        let mut config = base;
        let pose = self.pose(0.0);
        let v = self.body_velocity();
        let q = pose.q.to_vector();
        for (block, values) in [
            (CoreBlock::Position, pose.t.as_slice()),
            (CoreBlock::Velocity, v.as_slice()),
            (CoreBlock::Attitude, q.as_slice()),
        ] {
            let offset = block.state().offset;
            config.x0.rows_mut(offset, values.len()).copy_from_slice(values);
        }
        config
    }
}

fn sample_times(rate_hz: f64, duration: f64) -> impl Iterator<Item = f64> {
    let count = (duration * rate_hz).floor() as usize;
    (0..=count).map(move |k| k as f64 / rate_hz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ekf::{Kinematics, State};
    use approx::assert_relative_eq;

    fn scenario() -> Scenario {
        Scenario::new(ScenarioConfig::default(), &EkfConfig::default())
    }

    #[test]
    fn test_sample_times() {
        let times: Vec<f64> = sample_times(10.0, 0.5).collect();
        assert_eq!(times.len(), 6);
        assert_relative_eq!(times[5], 0.5);
    }

    #[test]
    fn test_pose_heading_follows_velocity() {
        let s = scenario();
        let dt = 1e-4;
        let t = 1.3;

        let world_velocity = (s.pose(t + dt).t - s.pose(t - dt).t) / (2.0 * dt);

        assert_relative_eq!(world_velocity, s.pose(t).q.rotate(&s.body_velocity()), epsilon = 1e-6);
    }

    #[test]
    fn test_imu_integrates_to_truth() {
        let s = scenario();
        let config = s.initial_config(EkfConfig::default());
        let kinematics = Kinematics {
            q_b_c: Quat::from_vector(&config.q_b_c),
            p_b_c: config.p_b_c,
            use_drag_term: false,
        };
        let mut state = State::from_core(&config.x0);
        let samples = s.imu_samples(2.0);

        for pair in samples.windows(2) {
            let dt = pair[1].timestamp_s - pair[0].timestamp_s;
            state = kinematics.step(&state, &pair[0].as_vector(), dt);
        }

        let truth = s.pose(2.0);
        assert!((state.position() - truth.t).norm() < 1e-2);
        assert_relative_eq!(state.attitude() - truth.q, Vector3::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn test_observations_are_visible_unit_bearings() {
        let s = scenario();
        let frame = s.observe(0.7);

        assert!(!frame.observations.is_empty());
        assert!(frame.observations.len() <= s.config().max_observations);
        let min_cos = (s.config().field_of_view / 2.0).cos();
        for obs in &frame.observations {
            assert_relative_eq!(obs.zeta.norm(), 1.0, epsilon = 1e-12);
            assert!(obs.zeta.z >= min_cos - 1e-12);
            let depth = obs.depth.unwrap();
            let landmark = s.landmarks()[obs.id.0 as usize];
            let camera = s.pose(0.7).compose(&Xform::new(Vector3::zeros(), Quat::from_vector(&EkfConfig::default().q_b_c)));
            assert_relative_eq!(camera.transform_point(&(obs.zeta * depth)), landmark, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_initial_config_matches_truth() {
        let s = scenario();
        let state = State::from_core(&s.initial_config(EkfConfig::default()).x0);
        let pose = s.pose(0.0);

        assert_relative_eq!(state.position(), pose.t);
        assert_relative_eq!(state.velocity(), Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(state.attitude() - pose.q, Vector3::zeros(), epsilon = 1e-12);
    }
}
