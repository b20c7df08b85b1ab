// Step/direction stepper driver (A4988-style)
//
// Open-loop: the position counter trusts the commanded step count.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ignore_released, ActuatorError, Result, StopToken};
use crate::io::{DigitalPort, HardwareError, Level, PlatformIo, PortMode};

pub struct Stepper {
    step: Box<dyn DigitalPort>,
    dir: Box<dyn DigitalPort>,
    /// Steps since process start; updated when a move is commanded
    position: i64,
    platform: Arc<dyn PlatformIo>,
    stop: StopToken,
    released: bool,
}

impl Stepper {
    /// Claim the step and direction lines, both driven low
    pub fn new(
        step_pin: u8,
        dir_pin: u8,
        platform: Arc<dyn PlatformIo>,
        stop: StopToken,
    ) -> std::result::Result<Self, HardwareError> {
        let mut step = platform.open_digital(step_pin, PortMode::Output(Level::Low))?;
        let dir = match platform.open_digital(dir_pin, PortMode::Output(Level::Low)) {
            Ok(dir) => dir,
            Err(e) => {
                if let Err(release_err) = step.release() {
                    warn!("Failed to release step pin {}: {}", step_pin, release_err);
                }
                return Err(e);
            }
        };
        Ok(Self {
            step,
            dir,
            position: 0,
            platform,
            stop,
            released: false,
        })
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    /// Move `steps` steps (sign selects direction), blocking for
    /// `2 * |steps| * delay` seconds.
    ///
    /// The position counter is advanced by the full `steps` before the pulse
    /// train starts, so it reports the commanded target while moving.
    pub fn move_by(&mut self, steps: i32, delay: f64) -> Result<()> {
        let half_period = Duration::try_from_secs_f64(delay)
            .ok()
            .filter(|period| !period.is_zero())
            .ok_or_else(|| {
                ActuatorError::InvalidArgument(format!(
                    "step delay must be a positive number of seconds, got {}",
                    delay
                ))
            })?;
        if self.released {
            return Err(ActuatorError::Released);
        }
        if steps == 0 {
            return Ok(());
        }

        // Negative counts run with the direction line high
        let direction = if steps < 0 { Level::High } else { Level::Low };
        self.dir.write(direction)?;
        debug!("Direction is {:?}", direction);

        self.position += i64::from(steps);

        for _ in 0..steps.unsigned_abs() {
            if self.stop.is_tripped() {
                self.step.set_low()?;
                warn!("Stepper move interrupted, position counter at {}", self.position);
                return Err(ActuatorError::Halted);
            }
            self.step.set_high()?;
            self.platform.sleep(half_period);
            self.step.set_low()?;
            self.platform.sleep(half_period);
        }

        info!("New position: {}", self.position);
        Ok(())
    }

    pub fn halt(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let step = ignore_released(self.step.set_low());
        let dir = ignore_released(self.dir.set_low());
        step.and(dir)
    }

    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let halted = self.halt();
        let step = self.step.release();
        let dir = self.dir.release();
        halted?;
        step?;
        dir?;
        self.released = true;
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
