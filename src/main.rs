use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use vi_ekf::config::EkfConfig;
use vi_ekf::ekf::ViEkf;
use vi_ekf::sim::{Scenario, ScenarioConfig};
use vi_ekf::system::{Estimator, EstimatorConfig};

/// Simulated seconds per wall-clock second.
const SPEEDUP: f64 = 20.0;

/// Sleep until simulated time `t` (s) is due.
fn pace(start: Instant, t: f64) {
    let due = start + Duration::from_secs_f64(t / SPEEDUP);
    if let Some(wait) = due.checked_duration_since(Instant::now()) {
        thread::sleep(wait);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vi_ekf=info")),
        )
        .init();

    let duration: f64 = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("invalid duration {:?}", arg))?,
        None => 10.0,
    };

    let scenario = Scenario::new(ScenarioConfig::default(), &EkfConfig::default());
    let config = scenario.initial_config(EkfConfig {
        max_features: 15,
        ..EkfConfig::default()
    });
    let filter = ViEkf::new(config).context("failed to create filter")?;

    let imu_samples = scenario.imu_samples(duration);
    let frames = scenario.frames(duration);
    let mut estimator = Estimator::new(
        filter,
        EstimatorConfig {
            output_capacity: frames.len() + 1,
            ..EstimatorConfig::default()
        },
    );
    println!(
        "Simulating {:.1} s: {} IMU samples, {} camera frames, {} landmarks",
        duration,
        imu_samples.len(),
        frames.len(),
        scenario.landmarks().len()
    );

    let start = Instant::now();
    let imu_producer = {
        let sender = estimator.imu_sender()?;
        thread::spawn(move || -> Result<()> {
            for sample in imu_samples {
                pace(start, sample.timestamp_s);
                sender.send(sample)?;
            }
            Ok(())
        })
    };
    let feature_producer = {
        let sender = estimator.feature_sender()?;
        thread::spawn(move || -> Result<()> {
            for frame in frames {
                pace(start, frame.timestamp_s);
                sender.send(frame)?;
            }
            Ok(())
        })
    };

    let odometry = estimator.odometry_receiver();
    let mut squared_error = 0.0;
    let mut count = 0usize;
    for producer in [imu_producer, feature_producer] {
        producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
    }
    let stats = estimator
        .shutdown()
        .context("estimator worker did not report")?;

    for estimate in odometry.try_iter() {
        let truth = scenario.pose(estimate.timestamp_s);
        squared_error += (estimate.pose.t - truth.t).norm_squared();
        count += 1;
    }

    let shared = estimator.shared();
    let pose = shared.global_pose();
    let truth = scenario.pose(duration);
    info!("final estimate {:?}", pose.t);

    println!("Done! {:?}", stats);
    println!(
        "Final position error: {:.3} m, features tracked: {}",
        (pose.t - truth.t).norm(),
        shared.feature_estimates().len()
    );
    if count > 0 {
        println!(
            "Position RMS over {} published estimates: {:.3} m",
            count,
            (squared_error / count as f64).sqrt()
        );
    }

    Ok(())
}
