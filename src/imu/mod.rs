pub mod sample;

pub use sample::{ImuBias, ImuSample, GRAVITY};
