//! Servo-driven gate.
//!
//! A move converts the target angle to a duty cycle, drives it for the
//! settle time, then drops the signal to 0 so the servo does not hold
//! torque or jitter while parked. Duty writes happen under the state lock
//! together with the matching `gate_status` update; the settle sleep does
//! not.

use std::time::Duration;

use anyhow::Result;

use crate::config::ServoSettings;
use crate::error::GateError;
use crate::hw::ServoLine;
use crate::state::{GateStatus, StateStore};

pub const CLOSED_ANGLE: f64 = 0.0;
pub const OPEN_ANGLE: f64 = 90.0;

/// Duty (percent of a 20 ms period) for a servo angle in degrees.
pub fn duty_for_angle(angle: f64) -> f64 {
    2.0 + angle / 18.0
}

/// Open the servo output named by `settings.backend`.
pub fn servo_line(settings: &ServoSettings) -> Result<Box<dyn ServoLine>> {
    if settings.backend.starts_with("stub://") {
        return Ok(Box::new(crate::hw::mock::SimulatedServo::new()));
    }
    #[cfg(feature = "hw-rpi")]
    {
        Ok(Box::new(crate::hw::rpi::servo(
            settings.pin,
            settings.frequency_hz,
        )?))
    }
    #[cfg(not(feature = "hw-rpi"))]
    {
        anyhow::bail!(
            "servo backend '{}' requires the hw-rpi feature",
            settings.backend
        )
    }
}

pub struct ServoGate {
    servo: Box<dyn ServoLine>,
    settle: Duration,
    released: bool,
}

impl ServoGate {
    pub fn new(servo: Box<dyn ServoLine>, settle: Duration) -> Self {
        Self {
            servo,
            settle,
            released: false,
        }
    }

    pub fn from_settings(settings: &ServoSettings) -> Result<Self> {
        Ok(Self::new(servo_line(settings)?, settings.settle))
    }

    pub fn open(&mut self, store: &StateStore) -> Result<(), GateError> {
        log::info!("opening the gate...");
        self.actuate(store, OPEN_ANGLE, GateStatus::Opening, GateStatus::Opened)?;
        log::info!("gate opened");
        Ok(())
    }

    pub fn close(&mut self, store: &StateStore) -> Result<(), GateError> {
        log::info!("closing the gate...");
        self.actuate(store, CLOSED_ANGLE, GateStatus::Closing, GateStatus::Closed)?;
        log::info!("gate closed");
        Ok(())
    }

    fn actuate(
        &mut self,
        store: &StateStore,
        angle: f64,
        moving: GateStatus,
        settled: GateStatus,
    ) -> Result<(), GateError> {
        let duty = duty_for_angle(angle);
        let servo = &mut self.servo;
        store.write(|state| {
            state.gate_status = moving;
            servo.set_duty_cycle(duty)
        })?;
        std::thread::sleep(self.settle);
        store.write(|state| {
            servo.set_duty_cycle(0.0)?;
            state.gate_status = settled;
            Ok::<(), GateError>(())
        })
    }

    /// Stop the drive signal and free the line. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.servo.set_duty_cycle(0.0) {
            log::warn!("failed to park servo: {}", err);
        }
        self.servo.release();
    }
}
