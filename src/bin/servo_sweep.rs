//! servo_sweep - bench test for the gate servo
//!
//! Steps the duty cycle from the closed to the open position, holds open,
//! returns to closed and parks the signal.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use plate_gate::gate::{duty_for_angle, servo_line, CLOSED_ANGLE, OPEN_ANGLE};
use plate_gate::GateConfig;

const STEP_DELAY: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file (overrides GATE_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seconds to wait before the first move.
    #[arg(long, default_value_t = 2)]
    start_delay_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GateConfig::load_from(Some(path))?,
        None => GateConfig::load()?,
    };

    let mut servo = servo_line(&config.servo)?;
    let closed = duty_for_angle(CLOSED_ANGLE);
    let open = duty_for_angle(OPEN_ANGLE);

    let result = (|| -> Result<()> {
        std::thread::sleep(Duration::from_secs(args.start_delay_secs));

        log::info!("sweeping duty {:.0}% -> {:.0}%", closed, open);
        let mut duty = closed;
        while duty <= open {
            servo.set_duty_cycle(duty)?;
            std::thread::sleep(STEP_DELAY);
            duty += 1.0;
        }
        std::thread::sleep(Duration::from_secs(2));

        log::info!("open position");
        servo.set_duty_cycle(open)?;
        std::thread::sleep(Duration::from_secs(2));

        log::info!("closed position");
        servo.set_duty_cycle(closed)?;
        std::thread::sleep(Duration::from_secs(1));

        servo.set_duty_cycle(0.0)?;
        Ok(())
    })();

    servo.release();
    result
}
