use nalgebra::{Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Gravity in the z-down keyframe frame (m/s^2).
pub const GRAVITY: Vector3<f64> = Vector3::new(0.0, 0.0, 9.80665);

/// IMU biases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuBias {
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

/// Single IMU measurement: specific force and angular rate in the body frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub timestamp_s: f64,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

impl ImuSample {
    pub fn new(timestamp_s: f64, accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self {
            timestamp_s,
            accel,
            gyro,
        }
    }

    /// Input vector `[accel; gyro]`.
    pub fn as_vector(&self) -> Vector6<f64> {
        Vector6::new(
            self.accel.x,
            self.accel.y,
            self.accel.z,
            self.gyro.x,
            self.gyro.y,
            self.gyro.z,
        )
    }
}
