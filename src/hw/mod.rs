//! Hardware seams.
//!
//! This module provides the line-level traits the drivers are written
//! against, and the `Hardware` bundle that owns every device handle:
//! - `mock`: recording/scripted lines for tests, plus the simulated servo
//! - `rpi`: Raspberry Pi GPIO and software PWM (feature: hw-rpi)
//!
//! Backends are picked from config strings. `stub://...` always selects a
//! simulated device; anything else selects real hardware and fails at
//! startup when the matching feature is not compiled in.

pub mod mock;
#[cfg(feature = "hw-rpi")]
pub mod rpi;

use std::sync::Arc;

use anyhow::Result;

use crate::camera::{self, Camera};
use crate::config::GateConfig;
use crate::error::HwError;
use crate::gate::ServoGate;
use crate::plates::PlateFixtures;
use crate::sensor::{self, DistanceSensor};

/// A digital output (ultrasonic trigger).
pub trait OutputLine: Send {
    fn set_high(&mut self) -> Result<(), HwError>;

    fn set_low(&mut self) -> Result<(), HwError>;

    fn release(&mut self) {}
}

/// A digital input (ultrasonic echo).
pub trait InputLine: Send {
    fn is_high(&mut self) -> Result<bool, HwError>;

    fn release(&mut self) {}
}

/// A 50 Hz PWM line driving a hobby servo.
///
/// Duty is a percentage of the period. `0.0` means no pulses at all, which
/// is how the servo is left between moves.
pub trait ServoLine: Send {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), HwError>;

    fn release(&mut self) {}
}

/// Every device handle the control loop drives.
///
/// Acquired once at startup; `release` stops the servo signal, frees the
/// pins and stops the camera. It runs exactly once, either explicitly or on
/// drop, whichever comes first.
pub struct Hardware {
    pub(crate) sensor: Box<dyn DistanceSensor>,
    pub(crate) camera: Box<dyn Camera>,
    pub(crate) gate: ServoGate,
    released: bool,
}

impl Hardware {
    pub fn new(sensor: Box<dyn DistanceSensor>, camera: Box<dyn Camera>, gate: ServoGate) -> Self {
        Self {
            sensor,
            camera,
            gate,
            released: false,
        }
    }

    /// Build the configured devices.
    pub fn from_config(cfg: &GateConfig, fixtures: Arc<PlateFixtures>) -> Result<Self> {
        let sensor = sensor::from_settings(&cfg.sensor)?;
        let camera = camera::from_settings(&cfg.camera, fixtures)?;
        let gate = ServoGate::from_settings(&cfg.servo)?;
        log::info!(
            "hardware ready: sensor={} camera={} servo={}",
            cfg.sensor.backend,
            cfg.camera.backend,
            cfg.servo.backend
        );
        Ok(Self::new(sensor, camera, gate))
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        log::info!("releasing hardware");
        self.gate.release();
        self.sensor.release();
        self.camera.release();
    }
}

impl Drop for Hardware {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockEcho, MockOutput, MockServo};
    use super::*;
    use crate::camera::FixtureCamera;
    use crate::sensor::{SensorTiming, UltrasonicSensor};
    use std::time::Duration;

    #[test]
    fn release_runs_once_across_explicit_call_and_drop() {
        let trigger = MockOutput::new();
        let trigger_log = trigger.log();
        let servo = MockServo::new();
        let servo_log = servo.log();
        let sensor = UltrasonicSensor::new(
            Box::new(trigger),
            Box::new(MockEcho::stuck_low()),
            SensorTiming::default(),
        );
        let camera = FixtureCamera::new(Arc::new(PlateFixtures::builtin()));
        let gate = ServoGate::new(Box::new(servo), Duration::ZERO);

        let mut hardware = Hardware::new(Box::new(sensor), Box::new(camera), gate);
        hardware.release();
        assert!(hardware.is_released());
        hardware.release();
        drop(hardware);

        assert_eq!(trigger_log.releases(), 1);
        assert_eq!(servo_log.releases(), 1);
        assert_eq!(servo_log.duties(), vec![0.0]);
    }

    #[test]
    fn drop_alone_releases() {
        let servo = MockServo::new();
        let servo_log = servo.log();
        let hardware = Hardware::new(
            Box::new(crate::sensor::SimulatedSensor::with_seed(5.0, 1)),
            Box::new(FixtureCamera::new(Arc::new(PlateFixtures::builtin()))),
            ServoGate::new(Box::new(servo), Duration::ZERO),
        );
        drop(hardware);
        assert_eq!(servo_log.releases(), 1);
    }
}
