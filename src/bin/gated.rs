//! gated - access-gate controller daemon
//!
//! This daemon:
//! 1. Acquires the sensor, camera and servo
//! 2. Runs the detection loop in the background
//! 3. Serves the dashboard API
//! 4. Releases the hardware on SIGINT, SIGTERM or SIGHUP

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use plate_gate::{
    api::{ApiConfig, ApiServer},
    load_fixtures, plate_services, ControlLoop, DetectionState, GateConfig, Hardware,
    LoopSettings, StateStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file (overrides GATE_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GateConfig::load_from(Some(path))?,
        None => GateConfig::load()?,
    };

    let fixtures = load_fixtures(&config.plates)?;
    let (recognizer, database) = plate_services(&config.plates, fixtures.clone())?;

    let store = StateStore::new(DetectionState::idle(&config.camera.placeholder_image));
    let mut last_gate = store.read().gate_status;
    store.observe(move |state| {
        if state.gate_status != last_gate {
            log::info!("gate status: {:?} -> {:?}", last_gate, state.gate_status);
            last_gate = state.gate_status;
        }
    });

    let hardware = Hardware::from_config(&config, fixtures)?;
    let settings = LoopSettings {
        threshold_m: config.sensor.threshold_m,
        placeholder_image: config.camera.placeholder_image.clone(),
        pacing: config.pacing,
    };
    let control = ControlLoop::new(store.clone(), hardware, recognizer, database, settings)
        .spawn()?;

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        image_dir: config.camera.image_dir.clone(),
        image_prefix: config.camera.url_prefix.clone(),
        placeholder_image: config.camera.placeholder_image.clone(),
    };
    let api_handle = ApiServer::new(api_config, store).spawn()?;
    log::info!("dashboard listening on http://{}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting shutdown signal handler: {}", e))?;

    log::info!("gated waiting for shutdown signal (Ctrl-C / SIGTERM)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping control loop...");
    let mut hardware = control.stop()?.into_hardware();
    hardware.release();
    api_handle.stop()?;
    log::info!("gated stopped");

    Ok(())
}
