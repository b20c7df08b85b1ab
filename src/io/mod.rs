// Digital I/O abstraction for the rig
//
// Provides:
// - DigitalPort / PwmChannel traits (the hardware boundary)
// - PlatformIo context that opens ports and owns the motion clock
// - Simulated platform (always available) and Raspberry Pi platform (feature "gpio-hardware")

pub mod pins;
#[cfg(feature = "gpio-hardware")]
mod rpi;
mod simulated;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use pins::{board_to_bcm, is_safe_board_pin, SAFE_BOARD_PINS};
#[cfg(feature = "gpio-hardware")]
pub use rpi::RpiPlatform;
pub use simulated::{PinSnapshot, SimulatedPlatform};

/// Logic level of a digital line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    High,
}

/// Pull resistor applied to an input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pull {
    #[default]
    None,
    Up,
    Down,
}

/// Mode a digital port is opened in. Fixed for the lifetime of the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMode {
    Input(Pull),
    /// Output driven to the given level as soon as the port is claimed
    Output(Level),
}

/// Error types for the port layer
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[cfg(feature = "gpio-hardware")]
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("Pin {pin} is not a GPIO line on this board")]
    UnknownPin { pin: u8 },

    #[error("Pin {pin} is already claimed")]
    PinBusy { pin: u8 },

    #[error("Pin {pin} has been released")]
    Released { pin: u8 },

    #[error("Pin {pin} is configured as {mode:?}, cannot drive it")]
    WrongMode { pin: u8, mode: PortMode },

    #[error("PWM on pin {pin} is not running")]
    NotRunning { pin: u8 },

    #[error("Duty cycle {duty} on pin {pin} is outside 0-100%")]
    DutyOutOfRange { pin: u8, duty: f64 },

    #[error("Write to pin {pin} failed: {reason}")]
    WriteFailed { pin: u8, reason: String },
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// A single addressable digital line, exclusively owned by one actuator
pub trait DigitalPort: Send {
    /// Board pin number
    fn pin(&self) -> u8;

    fn mode(&self) -> PortMode;

    /// Drive the line (output ports only)
    fn write(&mut self, level: Level) -> Result<()>;

    /// Read the line. Output ports report the level they are driving.
    fn read(&self) -> Result<Level>;

    /// Return the line to the platform. Idempotent.
    fn release(&mut self) -> Result<()>;

    fn set_high(&mut self) -> Result<()> {
        self.write(Level::High)
    }

    fn set_low(&mut self) -> Result<()> {
        self.write(Level::Low)
    }
}

/// A PWM-capable line with a frequency fixed at construction
pub trait PwmChannel: Send {
    fn pin(&self) -> u8;

    fn frequency(&self) -> f64;

    fn is_running(&self) -> bool;

    /// Current duty cycle in percent (0 while stopped)
    fn duty(&self) -> f64;

    /// Start (or restart) the waveform at the given duty cycle
    fn start(&mut self, duty: f64) -> Result<()>;

    /// Change the duty cycle of a running channel
    fn set_duty(&mut self, duty: f64) -> Result<()>;

    /// Halt the waveform and hold the line low
    fn stop(&mut self) -> Result<()>;

    /// Stop and return the line to the platform. Idempotent.
    fn release(&mut self) -> Result<()>;
}

/// Hardware context handed to the motion controller.
///
/// Replaces process-wide GPIO initialisation: every port is opened through
/// this object and every motion delay goes through `sleep`, which lets the
/// simulated platform run on a virtual clock.
pub trait PlatformIo: Send + Sync {
    /// Short human-readable platform name for logs
    fn name(&self) -> &str;

    fn open_digital(&self, pin: u8, mode: PortMode) -> Result<Box<dyn DigitalPort>>;

    fn open_pwm(&self, pin: u8, frequency: f64) -> Result<Box<dyn PwmChannel>>;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);

    /// Whether `pin` may be bound to an actuator
    fn is_safe_pin(&self, pin: u8) -> bool {
        is_safe_board_pin(pin)
    }
}

/// Reject duty cycles outside 0-100%
pub(crate) fn check_duty(pin: u8, duty: f64) -> Result<()> {
    if duty.is_finite() && (0.0..=100.0).contains(&duty) {
        Ok(())
    } else {
        Err(HardwareError::DutyOutOfRange { pin, duty })
    }
}
