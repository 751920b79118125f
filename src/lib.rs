//! Plate Gate
//!
//! Access-gate controller for a single driveway lane.
//!
//! # Architecture
//!
//! A background control loop drives the pipeline:
//!
//! 1. **Proximity**: an ultrasonic sensor reports the distance to the lane.
//! 2. **Capture**: a vehicle inside the threshold triggers a camera still.
//! 3. **Recognition**: the still is turned into a plate string.
//! 4. **Authorization**: the plate is looked up among known plates.
//! 5. **Actuation**: a known plate opens the servo gate, holds it, closes it.
//!
//! Every stage publishes into one shared `DetectionState`. The dashboard API
//! serves snapshots of it and flips its running flag; it never touches the
//! hardware.
//!
//! # Module Structure
//!
//! - `hw`: GPIO/PWM line traits, the Raspberry Pi backend, mocks
//! - `sensor`, `camera`, `gate`: the three devices
//! - `plates`: recognizer and known-plate database
//! - `control`: the detection loop
//! - `state`: shared snapshot store
//! - `api`: dashboard HTTP server
//! - `config`: file + env configuration

use std::sync::Arc;

use anyhow::Result;

pub mod api;
pub mod camera;
pub mod config;
pub mod control;
pub mod error;
pub mod gate;
pub mod hw;
pub mod plates;
pub mod sensor;
pub mod state;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use camera::{Camera, Capture, DirectoryCamera, FixtureCamera};
pub use config::{CameraSettings, GateConfig, PlateSettings, SensorSettings, ServoSettings};
pub use control::{ControlHandle, ControlLoop, CycleOutcome, LoopSettings, Pacing, Phase};
pub use error::{
    CaptureError, EchoPhase, GateError, HwError, LookupError, RecognitionError, SensorError,
};
pub use gate::ServoGate;
pub use hw::Hardware;
pub use plates::{
    FixtureDatabase, FixtureRecognizer, PlateDatabase, PlateFixtures, PlateRecognizer,
    PlateRecord, SqlitePlateDatabase, UNKNOWN_PLATE,
};
pub use sensor::{DistanceSensor, SimulatedSensor, UltrasonicSensor};
pub use state::{DetectionState, GateStatus, StateStore};

// -------------------- Plate Services --------------------

/// Fixture table from `settings.fixtures_path`, or the built-in one.
pub fn load_fixtures(settings: &PlateSettings) -> Result<Arc<PlateFixtures>> {
    let fixtures = match &settings.fixtures_path {
        Some(path) => PlateFixtures::from_file(path)?,
        None => PlateFixtures::builtin(),
    };
    log::info!(
        "plate fixtures: {} records ({})",
        fixtures.records().len(),
        settings
            .fixtures_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "builtin".to_string())
    );
    Ok(Arc::new(fixtures))
}

/// Recognizer and known-plate database for the configured backends.
///
/// With `db_path` set the known set lives in SQLite, seeded once from the
/// fixture known set; otherwise the fixture set answers lookups directly.
pub fn plate_services(
    settings: &PlateSettings,
    fixtures: Arc<PlateFixtures>,
) -> Result<(Box<dyn PlateRecognizer>, Box<dyn PlateDatabase>)> {
    let recognizer = FixtureRecognizer::new(fixtures.clone(), settings.recognize_delay);
    let database: Box<dyn PlateDatabase> = match &settings.db_path {
        Some(db_path) => {
            let mut db = SqlitePlateDatabase::open(db_path)?;
            let added = db.seed_if_empty(&fixtures)?;
            log::info!("known-plate db {} ready ({} seeded)", db_path, added);
            Box::new(db)
        }
        None => Box::new(FixtureDatabase::new(fixtures, settings.lookup_delay)),
    };
    Ok((Box::new(recognizer), database))
}
