//! Shared detection state.
//!
//! `StateStore` is the single record the control loop writes and the HTTP
//! layer reads. Every access goes through one mutex, held only for the
//! duration of an in-memory mutation (plus, for the servo, the duty-cycle
//! register write that goes with it). Nothing holds the lock across a sleep
//! or an echo wait.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

pub const STATUS_NO_VEHICLE: &str = "No vehicle detected.";
pub const STATUS_STOPPED: &str = "Detection stopped.";
pub const STATUS_SENSOR_ERROR: &str = "Proximity sensor error.";
pub const STATUS_VEHICLE_DETECTED: &str = "Vehicle detected.";
pub const STATUS_CAPTURING: &str = "Capturing image...";
pub const STATUS_CAPTURE_FAILED: &str = "Image capture failed.";
pub const STATUS_PROCESSING: &str = "Processing image...";
pub const STATUS_RECOGNITION_FAILED: &str = "Plate recognition failed.";
pub const STATUS_LOOKUP_FAILED: &str = "Plate lookup failed.";
pub const STATUS_GATE_FAILED: &str = "Gate actuation failed.";

pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "/images/NoVehicleDetected.jpg";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum GateStatus {
    #[default]
    Closed,
    Opening,
    Opened,
    Closing,
    #[serde(rename = "Closed (unknown plate)")]
    ClosedUnknownPlate,
}

impl GateStatus {
    pub fn is_closed(self) -> bool {
        matches!(self, GateStatus::Closed | GateStatus::ClosedUnknownPlate)
    }
}

/// Point-in-time view of the controller, as served by `GET /data`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionState {
    pub status: String,
    #[serde(rename = "image")]
    pub image_path: String,
    pub license_plate: String,
    pub plate_known: bool,
    pub gate_status: GateStatus,
    pub is_running: bool,
}

impl DetectionState {
    pub fn idle(placeholder_image: &str) -> Self {
        Self {
            status: STATUS_NO_VEHICLE.to_string(),
            image_path: placeholder_image.to_string(),
            license_plate: String::new(),
            plate_known: false,
            gate_status: GateStatus::Closed,
            is_running: true,
        }
    }

    /// Reset everything the control loop owns back to the idle snapshot.
    ///
    /// `is_running` belongs to the operator and is left as is.
    pub fn reset_for_cycle(&mut self, placeholder_image: &str) {
        self.status = STATUS_NO_VEHICLE.to_string();
        self.image_path = placeholder_image.to_string();
        self.license_plate.clear();
        self.plate_known = false;
        self.gate_status = GateStatus::Closed;
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }
}

impl Default for DetectionState {
    fn default() -> Self {
        Self::idle(DEFAULT_PLACEHOLDER_IMAGE)
    }
}

type Observer = Box<dyn FnMut(&DetectionState) + Send>;

struct Inner {
    state: DetectionState,
    observers: Vec<Observer>,
}

/// Cloneable handle to the shared detection state.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<Inner>>,
}

impl StateStore {
    pub fn new(initial: DetectionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: initial,
                observers: Vec::new(),
            })),
        }
    }

    /// Consistent copy of the current state.
    pub fn read(&self) -> DetectionState {
        self.lock().state.clone()
    }

    /// Apply `mutator` atomically. Observers see the result before the lock
    /// is released, so they never miss an intermediate value.
    pub fn write<R>(&self, mutator: impl FnOnce(&mut DetectionState) -> R) -> R {
        let mut inner = self.lock();
        let out = mutator(&mut inner.state);
        let Inner { state, observers } = &mut *inner;
        for observer in observers.iter_mut() {
            observer(state);
        }
        out
    }

    /// Operator toggle. This is the only field the HTTP layer writes.
    pub fn set_running(&self, running: bool) {
        self.write(|state| state.is_running = running);
    }

    pub fn is_running(&self) -> bool {
        self.lock().state.is_running
    }

    /// Register a callback invoked after every write, under the lock.
    ///
    /// Observers must be quick and must not touch the store themselves.
    pub fn observe(&self, observer: impl FnMut(&DetectionState) + Send + 'static) {
        self.lock().observers.push(Box::new(observer));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The state is plain data, so a panic mid-write cannot leave it
        // structurally broken; keep serving it.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DetectionState::default())
    }
}
