pub mod config;
pub mod ekf;
pub mod error;
pub mod geometry;
pub mod imu;
pub mod sim;
pub mod system;
