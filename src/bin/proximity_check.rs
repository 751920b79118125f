//! proximity_check - one-shot ultrasonic sensor reading

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use plate_gate::{sensor, GateConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file (overrides GATE_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seconds to let the sensor settle before measuring.
    #[arg(long, default_value_t = 2)]
    settle_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GateConfig::load_from(Some(path))?,
        None => GateConfig::load()?,
    };

    let mut sensor = sensor::from_settings(&config.sensor)?;
    log::info!(
        "waiting {}s for sensor {} to settle",
        args.settle_secs,
        config.sensor.backend
    );
    std::thread::sleep(Duration::from_secs(args.settle_secs));

    match sensor.measure_distance() {
        Ok(distance_m) => println!("Distance: {:.1} cm", distance_m * 100.0),
        Err(err) => {
            log::error!("measurement failed: {}", err);
            println!("Failed to measure distance");
        }
    }
    sensor.release();

    Ok(())
}
