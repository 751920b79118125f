//! Detection-and-gate control loop.
//!
//! One iteration:
//! 1. Stopped by the operator → report it, sleep, touch no hardware
//! 2. Reset to the idle snapshot, wait, read the proximity sensor
//! 3. Vehicle within threshold → capture, recognize, look the plate up
//! 4. Known plate → open, hold, close; unknown → keep the gate shut
//!
//! Every failure is logged, reflected into `status` and absorbed; the next
//! iteration starts clean. The operator toggle is only consulted at the top
//! of an iteration, so a cycle already past the sensor always runs to the
//! end. Process shutdown is different: it is honored at every pause except
//! inside the gate cycle, which always finishes closing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::hw::Hardware;
use crate::plates::{PlateDatabase, PlateRecognizer};
use crate::sensor::DEFAULT_THRESHOLD_M;
use crate::state::{
    GateStatus, StateStore, DEFAULT_PLACEHOLDER_IMAGE, STATUS_CAPTURE_FAILED, STATUS_CAPTURING,
    STATUS_GATE_FAILED, STATUS_LOOKUP_FAILED, STATUS_NO_VEHICLE, STATUS_PROCESSING,
    STATUS_RECOGNITION_FAILED, STATUS_SENSOR_ERROR, STATUS_STOPPED, STATUS_VEHICLE_DETECTED,
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Fixed delays pacing the loop. None of these are timeouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    /// Before each sensor reading.
    pub wait: Duration,
    /// Between checks while the operator has detection stopped.
    pub stopped: Duration,
    /// After a successful capture.
    pub capture_settle: Duration,
    /// At the end of a processed cycle.
    pub process_settle: Duration,
    /// Gate held open before closing.
    pub hold_open: Duration,
}

impl Pacing {
    /// No delays at all.
    pub fn immediate() -> Self {
        Self {
            wait: Duration::ZERO,
            stopped: Duration::ZERO,
            capture_settle: Duration::ZERO,
            process_settle: Duration::ZERO,
            hold_open: Duration::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            stopped: Duration::from_secs(1),
            capture_settle: Duration::from_secs(2),
            process_settle: Duration::from_secs(2),
            hold_open: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub threshold_m: f64,
    pub placeholder_image: String,
    pub pacing: Pacing,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            threshold_m: DEFAULT_THRESHOLD_M,
            placeholder_image: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
            pacing: Pacing::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Waiting,
    Sensing,
    Detected,
    Capturing,
    Processing,
    LookupPending,
    GateCycle,
    Opening,
    HoldOpen,
    Closing,
    UnknownPlate,
}

/// How an iteration ended.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    Stopped,
    Shutdown,
    SensorFailed,
    NoVehicle { distance_m: f64 },
    CaptureFailed,
    RecognitionFailed,
    LookupFailed,
    GateCycled { plate: String },
    GateFailed { plate: String },
    UnknownPlate { plate: String },
}

pub struct ControlLoop {
    store: StateStore,
    hardware: Hardware,
    recognizer: Box<dyn PlateRecognizer>,
    database: Box<dyn PlateDatabase>,
    settings: LoopSettings,
    phase: Phase,
    shutdown: Arc<AtomicBool>,
}

impl ControlLoop {
    pub fn new(
        store: StateStore,
        hardware: Hardware,
        recognizer: Box<dyn PlateRecognizer>,
        database: Box<dyn PlateDatabase>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            store,
            hardware,
            recognizer,
            database,
            settings,
            phase: Phase::Idle,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Give the hardware back, e.g. to release it after the loop stopped.
    pub fn into_hardware(self) -> Hardware {
        self.hardware
    }

    /// Run iterations until shutdown is requested.
    pub fn run(&mut self) {
        log::info!(
            "control loop running (threshold {:.2} m)",
            self.settings.threshold_m
        );
        while !self.shutdown_requested() {
            let outcome = self.run_once();
            log::debug!("cycle finished: {:?}", outcome);
        }
        log::info!("control loop stopped");
    }

    /// Start the loop on its own thread.
    pub fn spawn(mut self) -> Result<ControlHandle> {
        let shutdown = self.shutdown.clone();
        let join = std::thread::Builder::new()
            .name("control-loop".to_string())
            .spawn(move || {
                self.run();
                self
            })?;
        Ok(ControlHandle {
            shutdown,
            join: Some(join),
        })
    }

    pub fn run_once(&mut self) -> CycleOutcome {
        if !self.store.is_running() {
            self.enter(Phase::Idle);
            self.store.write(|s| s.set_status(STATUS_STOPPED));
            self.pause(self.settings.pacing.stopped);
            return CycleOutcome::Stopped;
        }

        self.enter(Phase::Idle);
        let placeholder = self.settings.placeholder_image.as_str();
        self.store.write(|s| s.reset_for_cycle(placeholder));

        self.enter(Phase::Waiting);
        if self.pause(self.settings.pacing.wait) {
            return self.finish(CycleOutcome::Shutdown);
        }

        self.enter(Phase::Sensing);
        let distance_m = match self.hardware.sensor.measure_distance() {
            Ok(distance) => distance,
            Err(err) => {
                log::error!("proximity sensor error: {}", err);
                self.store.write(|s| s.set_status(STATUS_SENSOR_ERROR));
                return self.finish(CycleOutcome::SensorFailed);
            }
        };
        log::debug!("sensor distance: {:.2} m", distance_m);
        if distance_m > self.settings.threshold_m {
            self.store.write(|s| s.set_status(STATUS_NO_VEHICLE));
            return self.finish(CycleOutcome::NoVehicle { distance_m });
        }

        self.enter(Phase::Detected);
        log::info!("vehicle detected at {:.2} m", distance_m);
        self.store.write(|s| s.set_status(STATUS_VEHICLE_DETECTED));

        self.enter(Phase::Capturing);
        self.store.write(|s| s.set_status(STATUS_CAPTURING));
        let capture = match self.hardware.camera.capture_image() {
            Ok(capture) => capture,
            Err(err) => {
                log::error!("image capture failed: {}", err);
                self.store.write(|s| s.set_status(STATUS_CAPTURE_FAILED));
                return self.finish(CycleOutcome::CaptureFailed);
            }
        };
        self.store
            .write(|s| s.image_path = capture.image_path.clone());
        if self.pause(self.settings.pacing.capture_settle) {
            return self.finish(CycleOutcome::Shutdown);
        }

        self.enter(Phase::Processing);
        self.store.write(|s| s.set_status(STATUS_PROCESSING));
        let plate = match self.recognizer.recognize(&capture) {
            Ok(plate) => plate,
            Err(err) => {
                log::error!("plate recognition failed: {}", err);
                self.store.write(|s| s.set_status(STATUS_RECOGNITION_FAILED));
                return self.finish(CycleOutcome::RecognitionFailed);
            }
        };
        log::info!("license plate detected: {}", plate);
        self.store.write(|s| {
            s.license_plate = plate.clone();
            s.set_status(format!("License plate detected: {plate}"));
        });

        self.enter(Phase::LookupPending);
        let known = match self.database.is_known(&plate) {
            Ok(known) => known,
            Err(err) => {
                log::error!("plate lookup failed for {}: {}", plate, err);
                self.store.write(|s| s.set_status(STATUS_LOOKUP_FAILED));
                return self.finish(CycleOutcome::LookupFailed);
            }
        };
        let label = if known { "Known" } else { "Unknown" };
        self.store.write(|s| {
            s.plate_known = known;
            s.set_status(format!("License plate {plate}: {label}"));
        });

        let outcome = if known {
            self.enter(Phase::GateCycle);
            self.cycle_gate(plate)
        } else {
            self.enter(Phase::UnknownPlate);
            log::warn!("unknown license plate {}; gate stays closed", plate);
            self.store
                .write(|s| s.gate_status = GateStatus::ClosedUnknownPlate);
            CycleOutcome::UnknownPlate { plate }
        };

        self.pause(self.settings.pacing.process_settle);
        self.finish(outcome)
    }

    fn cycle_gate(&mut self, plate: String) -> CycleOutcome {
        self.enter(Phase::Opening);
        if let Err(err) = self.hardware.gate.open(&self.store) {
            log::error!("failed to open gate for {}: {}", plate, err);
            self.store.write(|s| s.set_status(STATUS_GATE_FAILED));
            self.enter(Phase::Closing);
            if let Err(err) = self.hardware.gate.close(&self.store) {
                log::error!("failed to close gate after open failure: {}", err);
            }
            return CycleOutcome::GateFailed { plate };
        }

        self.enter(Phase::HoldOpen);
        std::thread::sleep(self.settings.pacing.hold_open);

        self.enter(Phase::Closing);
        if let Err(err) = self.hardware.gate.close(&self.store) {
            log::error!("failed to close gate for {}: {}", plate, err);
            self.store.write(|s| s.set_status(STATUS_GATE_FAILED));
            return CycleOutcome::GateFailed { plate };
        }
        CycleOutcome::GateCycled { plate }
    }

    fn finish(&mut self, outcome: CycleOutcome) -> CycleOutcome {
        self.enter(Phase::Idle);
        outcome
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            log::trace!("phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on shutdown. Returns true when
    /// shutdown was requested.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.shutdown_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}

/// Running control loop. Dropping the handle stops the loop too.
#[derive(Debug)]
pub struct ControlHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<ControlLoop>>,
}

impl ControlHandle {
    /// Ask the loop to stop and wait for it; hands the loop back so its
    /// hardware can be released.
    pub fn stop(mut self) -> Result<ControlLoop> {
        self.shutdown.store(true, Ordering::SeqCst);
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("control loop already stopped"))?;
        join.join()
            .map_err(|_| anyhow!("control loop thread panicked"))
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            // the loop (and its hardware) is dropped here, which releases it
            let _ = join.join();
        }
    }
}
