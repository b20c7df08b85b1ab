// Solenoid valve / latch on a single output line
use std::sync::Arc;

use tracing::debug;

use super::{ignore_released, ActuatorError, Result};
use crate::io::{DigitalPort, HardwareError, Level, PlatformIo, PortMode};

pub struct Solenoid {
    line: Box<dyn DigitalPort>,
    open: bool,
    released: bool,
}

impl Solenoid {
    /// Claim the control line, starting closed
    pub fn new(pin: u8, platform: Arc<dyn PlatformIo>) -> std::result::Result<Self, HardwareError> {
        let line = platform.open_digital(pin, PortMode::Output(Level::Low))?;
        Ok(Self {
            line,
            open: false,
            released: false,
        })
    }

    pub fn open(&mut self) -> Result<()> {
        self.drive(Level::High)
    }

    pub fn close(&mut self) -> Result<()> {
        self.drive(Level::Low)
    }

    fn drive(&mut self, level: Level) -> Result<()> {
        if self.released {
            return Err(ActuatorError::Released);
        }
        self.line.write(level)?;
        self.open = level == Level::High;
        debug!("Solenoid on pin {} {}", self.line.pin(), if self.open { "open" } else { "closed" });
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn halt(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        ignore_released(self.line.set_low())?;
        self.open = false;
        Ok(())
    }

    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let halted = self.halt();
        self.line.release()?;
        halted?;
        self.released = true;
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedPlatform;

    #[test]
    fn test_open_and_close_drive_line() {
        let sim = SimulatedPlatform::new();
        let mut solenoid = Solenoid::new(36, Arc::new(sim.clone())).unwrap();
        assert_eq!(sim.pin(36).unwrap().level, Level::Low);

        solenoid.open().unwrap();
        assert!(solenoid.is_open());
        assert_eq!(sim.pin(36).unwrap().level, Level::High);

        solenoid.close().unwrap();
        assert!(!solenoid.is_open());
        assert_eq!(sim.pin(36).unwrap().level, Level::Low);
    }

    #[test]
    fn test_release_leaves_line_low() {
        let sim = SimulatedPlatform::new();
        let mut solenoid = Solenoid::new(36, Arc::new(sim.clone())).unwrap();
        solenoid.open().unwrap();

        solenoid.release().unwrap();

        let snapshot = sim.pin(36).unwrap();
        assert_eq!(snapshot.level, Level::Low);
        assert!(!snapshot.claimed);
        assert!(matches!(solenoid.open(), Err(ActuatorError::Released)));
    }
}
