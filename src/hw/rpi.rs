//! Raspberry Pi lines backed by `rppal`.
//!
//! Pin numbers are BCM. The servo uses rppal's software PWM on a plain GPIO
//! pin, which is enough for a 50 Hz hobby servo.

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, InputPin, OutputPin};

use super::{InputLine, OutputLine, ServoLine};
use crate::error::HwError;

pub struct RpiOutput {
    pin: OutputPin,
}

impl OutputLine for RpiOutput {
    fn set_high(&mut self) -> Result<(), HwError> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), HwError> {
        self.pin.set_low();
        Ok(())
    }

    fn release(&mut self) {
        self.pin.set_low();
        self.pin.set_reset_on_drop(true);
    }
}

pub struct RpiInput {
    pin: InputPin,
}

impl InputLine for RpiInput {
    fn is_high(&mut self) -> Result<bool, HwError> {
        Ok(self.pin.is_high())
    }

    fn release(&mut self) {
        self.pin.set_reset_on_drop(true);
    }
}

pub struct RpiServo {
    pin: OutputPin,
    frequency_hz: f64,
}

impl ServoLine for RpiServo {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), HwError> {
        self.pin
            .set_pwm_frequency(self.frequency_hz, percent / 100.0)
            .map_err(|err| HwError::Pwm(err.to_string()))
    }

    fn release(&mut self) {
        if let Err(err) = self.pin.clear_pwm() {
            log::warn!("failed to stop servo pwm: {}", err);
        }
        self.pin.set_low();
        self.pin.set_reset_on_drop(true);
    }
}

/// Claim the trigger (output) and echo (input) pins of an ultrasonic sensor.
pub fn ultrasonic_lines(trigger_pin: u8, echo_pin: u8) -> Result<(RpiOutput, RpiInput)> {
    let gpio = Gpio::new().context("open gpio")?;
    let trigger = gpio
        .get(trigger_pin)
        .with_context(|| format!("claim trigger pin {trigger_pin}"))?
        .into_output_low();
    let echo = gpio
        .get(echo_pin)
        .with_context(|| format!("claim echo pin {echo_pin}"))?
        .into_input();
    Ok((RpiOutput { pin: trigger }, RpiInput { pin: echo }))
}

/// Claim a servo pin and start it with no pulses.
pub fn servo(pin: u8, frequency_hz: f64) -> Result<RpiServo> {
    let gpio = Gpio::new().context("open gpio")?;
    let mut pin = gpio
        .get(pin)
        .with_context(|| format!("claim servo pin {pin}"))?
        .into_output_low();
    pin.set_pwm_frequency(frequency_hz, 0.0)
        .context("start servo pwm")?;
    Ok(RpiServo { pin, frequency_hz })
}
