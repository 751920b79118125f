//! Mock and simulated lines.
//!
//! The mocks record every write into a shared `LineLog` so tests can inspect
//! what a driver did after the driver itself has been moved into a control
//! loop. `SimulatedServo` backs `stub://` servo configs in the daemon.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{InputLine, OutputLine, ServoLine};
use crate::error::HwError;
use crate::sensor::CM_PER_SECOND;

#[derive(Debug, Default)]
struct LineRecord {
    levels: Vec<bool>,
    duties: Vec<f64>,
    releases: usize,
}

/// Shared record of writes made to a mock line.
#[derive(Clone, Debug, Default)]
pub struct LineLog {
    inner: Arc<Mutex<LineRecord>>,
}

impl LineLog {
    /// Output levels written, in order (`true` = high).
    pub fn levels(&self) -> Vec<bool> {
        self.record().levels.clone()
    }

    /// Duty cycles written, in order.
    pub fn duties(&self) -> Vec<f64> {
        self.record().duties.clone()
    }

    /// Non-zero duty writes, i.e. actual servo moves.
    pub fn moves(&self) -> usize {
        self.record().duties.iter().filter(|d| **d > 0.0).count()
    }

    pub fn releases(&self) -> usize {
        self.record().releases
    }

    fn record(&self) -> std::sync::MutexGuard<'_, LineRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Output line that records its levels.
#[derive(Debug, Default)]
pub struct MockOutput {
    log: LineLog,
    released: bool,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> LineLog {
        self.log.clone()
    }

    fn push(&mut self, level: bool) -> Result<(), HwError> {
        if self.released {
            return Err(HwError::Released);
        }
        self.log.record().levels.push(level);
        Ok(())
    }
}

impl OutputLine for MockOutput {
    fn set_high(&mut self) -> Result<(), HwError> {
        self.push(true)
    }

    fn set_low(&mut self) -> Result<(), HwError> {
        self.push(false)
    }

    fn release(&mut self) {
        self.released = true;
        self.log.record().releases += 1;
    }
}

#[derive(Clone, Copy, Debug)]
enum EchoScript {
    Pulse { rise_after: Duration, high_for: Duration },
    StuckLow,
    StuckHigh,
}

/// Echo line that plays back a scripted pulse.
///
/// The clock starts on the first poll of a measurement and re-arms once the
/// pulse has ended, so one `MockEcho` can serve many measurements.
#[derive(Debug)]
pub struct MockEcho {
    script: EchoScript,
    armed_at: Option<Instant>,
}

impl MockEcho {
    pub fn pulse(rise_after: Duration, high_for: Duration) -> Self {
        Self {
            script: EchoScript::Pulse {
                rise_after,
                high_for,
            },
            armed_at: None,
        }
    }

    /// Echo pulse matching a target `meters` away.
    pub fn for_distance(meters: f64) -> Self {
        let high_for = Duration::from_secs_f64(meters * 100.0 / CM_PER_SECOND);
        Self::pulse(Duration::from_micros(200), high_for)
    }

    /// Echo never rises: no object, or a disconnected sensor.
    pub fn stuck_low() -> Self {
        Self {
            script: EchoScript::StuckLow,
            armed_at: None,
        }
    }

    /// Echo never falls.
    pub fn stuck_high() -> Self {
        Self {
            script: EchoScript::StuckHigh,
            armed_at: None,
        }
    }
}

impl InputLine for MockEcho {
    fn is_high(&mut self) -> Result<bool, HwError> {
        match self.script {
            EchoScript::StuckLow => Ok(false),
            EchoScript::StuckHigh => Ok(true),
            EchoScript::Pulse {
                rise_after,
                high_for,
            } => {
                let now = Instant::now();
                let elapsed = now.duration_since(*self.armed_at.get_or_insert(now));
                if elapsed >= rise_after + high_for {
                    self.armed_at = None;
                    return Ok(false);
                }
                Ok(elapsed >= rise_after)
            }
        }
    }
}

/// Servo line that records its duty cycles.
#[derive(Debug, Default)]
pub struct MockServo {
    log: LineLog,
    released: bool,
}

impl MockServo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> LineLog {
        self.log.clone()
    }
}

impl ServoLine for MockServo {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), HwError> {
        if self.released {
            return Err(HwError::Released);
        }
        if !(0.0..=100.0).contains(&percent) {
            return Err(HwError::Pwm(format!("duty cycle {percent} out of range")));
        }
        self.log.record().duties.push(percent);
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
        self.log.record().releases += 1;
    }
}

/// Servo with no hardware behind it; used for `stub://` configs.
#[derive(Debug, Default)]
pub struct SimulatedServo {
    duty: f64,
    moves: u64,
}

impl SimulatedServo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServoLine for SimulatedServo {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), HwError> {
        if percent > 0.0 {
            self.moves += 1;
        }
        self.duty = percent;
        log::debug!("simulated servo duty={:.2}% moves={}", self.duty, self.moves);
        Ok(())
    }

    fn release(&mut self) {
        log::info!("simulated servo stopped after {} moves", self.moves);
    }
}
