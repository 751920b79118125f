//! Error types for the hardware-facing parts of the gate controller.
//!
//! Every variant here is absorbed by the control loop: it is logged,
//! reflected into the dashboard status, and the loop moves on to the next
//! iteration. Setup and plumbing code (config, HTTP, binaries) uses
//! `anyhow::Result` instead.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by output and PWM lines once they are running.
///
/// Opening a line is setup and reports through `anyhow`.
#[derive(Debug, Error)]
pub enum HwError {
    #[error("pwm error: {0}")]
    Pwm(String),

    #[error("line already released")]
    Released,
}

/// Which edge the ultrasonic sensor was waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EchoPhase {
    /// Echo line low→high (pulse start).
    Rising,
    /// Echo line high→low (pulse end).
    Falling,
}

impl fmt::Display for EchoPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoPhase::Rising => f.write_str("HIGH"),
            EchoPhase::Falling => f.write_str("LOW"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("timeout after {waited:?} waiting for echo to go {phase}")]
    Timeout { phase: EchoPhase, waited: Duration },

    #[error("sensor line failure: {0}")]
    Hardware(#[from] HwError),
}

impl SensorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SensorError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("camera device error: {0}")]
    Device(String),

    #[error("no fixture images configured")]
    NoFixtures,
}

/// Reserved for a real OCR backend; the fixture recognizer never fails.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("plate unreadable in {0}")]
    Unreadable(String),
}

/// Reserved for a real plate database; the fixture database never fails.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("plate database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("plate lookup unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("servo drive failure: {0}")]
    Hardware(#[from] HwError),
}
