//! Ultrasonic proximity sensing.
//!
//! `UltrasonicSensor` speaks the HC-SR04 trigger/echo protocol over two
//! lines: a 10 µs trigger pulse, then the echo line stays high for the
//! round-trip time of the ping. Both echo edges are awaited with a bounded
//! busy poll, each phase with its own deadline.

use std::time::{Duration, Instant};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SensorSettings;
use crate::error::{EchoPhase, SensorError};
use crate::hw::{InputLine, OutputLine};

/// Half the speed of sound in cm/s (the echo covers the distance twice).
pub const CM_PER_SECOND: f64 = 17_150.0;

/// Distance at or under which a vehicle is considered present.
pub const DEFAULT_THRESHOLD_M: f64 = 0.2;

pub trait DistanceSensor: Send {
    /// Take one blocking reading, in meters.
    fn measure_distance(&mut self) -> Result<f64, SensorError>;

    fn release(&mut self) {}
}

#[derive(Clone, Copy, Debug)]
pub struct SensorTiming {
    /// Trigger held low before the pulse.
    pub settle: Duration,
    /// Trigger pulse width.
    pub pulse: Duration,
    /// Limit for each echo phase.
    pub echo_timeout: Duration,
}

impl Default for SensorTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
            pulse: Duration::from_micros(10),
            echo_timeout: Duration::from_secs(1),
        }
    }
}

pub struct UltrasonicSensor {
    trigger: Box<dyn OutputLine>,
    echo: Box<dyn InputLine>,
    timing: SensorTiming,
}

impl UltrasonicSensor {
    pub fn new(trigger: Box<dyn OutputLine>, echo: Box<dyn InputLine>, timing: SensorTiming) -> Self {
        Self {
            trigger,
            echo,
            timing,
        }
    }

    fn send_trigger_pulse(&mut self) -> Result<(), SensorError> {
        self.trigger.set_low()?;
        std::thread::sleep(self.timing.settle);
        self.trigger.set_high()?;
        std::thread::sleep(self.timing.pulse);
        self.trigger.set_low()?;
        Ok(())
    }

    /// Poll until the echo line reads `phase`'s target level and return the
    /// instant it was first seen there.
    fn wait_for_edge(&mut self, phase: EchoPhase) -> Result<Instant, SensorError> {
        let want_high = phase == EchoPhase::Rising;
        let started = Instant::now();
        loop {
            let now = Instant::now();
            if self.echo.is_high()? == want_high {
                return Ok(now);
            }
            let waited = now.duration_since(started);
            if waited > self.timing.echo_timeout {
                return Err(SensorError::Timeout { phase, waited });
            }
            std::hint::spin_loop();
        }
    }
}

impl DistanceSensor for UltrasonicSensor {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        self.send_trigger_pulse()?;
        let pulse_start = self.wait_for_edge(EchoPhase::Rising)?;
        let pulse_end = self.wait_for_edge(EchoPhase::Falling)?;
        let pulse = pulse_end.duration_since(pulse_start);
        log::debug!("echo pulse duration: {:?}", pulse);
        Ok(pulse_to_meters(pulse))
    }

    fn release(&mut self) {
        self.trigger.release();
        self.echo.release();
    }
}

/// Convert an echo pulse width to meters.
pub fn pulse_to_meters(pulse: Duration) -> f64 {
    pulse.as_secs_f64() * CM_PER_SECOND / 100.0
}

/// Sensor with no hardware behind it: uniform random readings in
/// `[0, max_m)`.
pub struct SimulatedSensor {
    max_m: f64,
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(max_m: f64) -> Self {
        Self {
            max_m,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(max_m: f64, seed: u64) -> Self {
        Self {
            max_m,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl DistanceSensor for SimulatedSensor {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        let distance = self.rng.gen_range(0.0..self.max_m);
        log::debug!("simulated sensor distance: {:.2} m", distance);
        Ok(distance)
    }
}

/// Build the configured sensor.
pub fn from_settings(settings: &SensorSettings) -> Result<Box<dyn DistanceSensor>> {
    if settings.backend.starts_with("stub://") {
        return Ok(Box::new(SimulatedSensor::new(settings.simulated_max_m)));
    }
    #[cfg(feature = "hw-rpi")]
    {
        let (trigger, echo) =
            crate::hw::rpi::ultrasonic_lines(settings.trigger_pin, settings.echo_pin)?;
        Ok(Box::new(UltrasonicSensor::new(
            Box::new(trigger),
            Box::new(echo),
            settings.timing(),
        )))
    }
    #[cfg(not(feature = "hw-rpi"))]
    {
        anyhow::bail!(
            "sensor backend '{}' requires the hw-rpi feature",
            settings.backend
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::{MockEcho, MockOutput};

    fn fast_timing() -> SensorTiming {
        SensorTiming {
            settle: Duration::ZERO,
            pulse: Duration::from_micros(10),
            echo_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn trigger_goes_low_high_low() {
        let trigger = MockOutput::new();
        let log = trigger.log();
        let mut sensor = UltrasonicSensor::new(
            Box::new(trigger),
            Box::new(MockEcho::for_distance(0.5)),
            fast_timing(),
        );
        sensor.measure_distance().unwrap();
        assert_eq!(log.levels(), vec![false, true, false]);
    }

    #[test]
    fn measures_scripted_echo() {
        let mut sensor = UltrasonicSensor::new(
            Box::new(MockOutput::new()),
            Box::new(MockEcho::for_distance(1.0)),
            fast_timing(),
        );
        let meters = sensor.measure_distance().unwrap();
        // polling jitter only ever lengthens the observed pulse slightly
        assert!((0.9..1.3).contains(&meters), "measured {meters}");
    }

    #[test]
    fn echo_that_never_rises_times_out() {
        let mut sensor = UltrasonicSensor::new(
            Box::new(MockOutput::new()),
            Box::new(MockEcho::stuck_low()),
            fast_timing(),
        );
        let err = sensor.measure_distance().unwrap_err();
        assert!(matches!(
            err,
            SensorError::Timeout {
                phase: EchoPhase::Rising,
                ..
            }
        ));
    }

    #[test]
    fn echo_that_never_falls_times_out() {
        let mut sensor = UltrasonicSensor::new(
            Box::new(MockOutput::new()),
            Box::new(MockEcho::stuck_high()),
            fast_timing(),
        );
        let err = sensor.measure_distance().unwrap_err();
        assert!(matches!(
            err,
            SensorError::Timeout {
                phase: EchoPhase::Falling,
                ..
            }
        ));
    }

    #[test]
    fn default_timeout_is_one_second() {
        let timing = SensorTiming {
            settle: Duration::ZERO,
            ..SensorTiming::default()
        };
        let mut sensor = UltrasonicSensor::new(
            Box::new(MockOutput::new()),
            Box::new(MockEcho::stuck_low()),
            timing,
        );
        let started = Instant::now();
        let err = sensor.measure_distance().unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_secs(1), "gave up after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "hung for {elapsed:?}");
    }

    #[test]
    fn pulse_conversion() {
        // 1 ms round trip is 17.15 cm
        let meters = pulse_to_meters(Duration::from_millis(1));
        assert!((meters - 0.1715).abs() < 1e-9);
    }

    #[test]
    fn simulated_readings_stay_in_range() {
        let mut sensor = SimulatedSensor::with_seed(5.0, 42);
        for _ in 0..100 {
            let d = sensor.measure_distance().unwrap();
            assert!((0.0..5.0).contains(&d));
        }
    }
}
