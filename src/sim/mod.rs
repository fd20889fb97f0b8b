//! Synthetic scenarios with exact ground truth, used by the demo binary and
//! by the end-to-end tests.

pub mod scenario;

pub use scenario::{Scenario, ScenarioConfig};
