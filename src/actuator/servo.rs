// Hobby servo on a PWM line, walked one logical unit at a time
//
// Positions are on a 0-100 logical scale. Each profile maps position to a
// pulse width and pulse width to a duty cycle at the profile's frequency.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ignore_released, ActuatorError, ActuatorKind, Result, StopToken};
use crate::config::{
    LATCH_CLOSED, LATCH_OPEN, SERVO_FREQ_HZ, SERVO_MAX_PULSE_US, SERVO_MIN_PULSE_US,
    SERVO_SETTLE, SMALL_SERVO_FREQ_HZ, SMALL_SERVO_MAX_PULSE_S, SMALL_SERVO_MIN_PULSE_S,
    SMALL_SERVO_SETTLE,
};
use crate::io::{HardwareError, PlatformIo, PwmChannel};

/// Pulse-width calibration of a servo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoProfile {
    /// 500-2500 us, 0.1 s settle per unit (elevator)
    Standard,
    /// 1-4 ms, 0.3 s settle per unit (flange latch)
    SmallThrow,
}

impl ServoProfile {
    pub fn kind(self) -> ActuatorKind {
        match self {
            Self::Standard => ActuatorKind::Servo,
            Self::SmallThrow => ActuatorKind::SmallServo,
        }
    }

    pub fn frequency(self) -> f64 {
        match self {
            Self::Standard => SERVO_FREQ_HZ,
            Self::SmallThrow => SMALL_SERVO_FREQ_HZ,
        }
    }

    /// Wait after each one-unit step
    pub fn settle(self) -> Duration {
        match self {
            Self::Standard => SERVO_SETTLE,
            Self::SmallThrow => SMALL_SERVO_SETTLE,
        }
    }

    /// Duty cycle (percent) for a logical position
    pub fn duty_for(self, position: u8) -> f64 {
        let fraction = f64::from(position) / 100.0;
        match self {
            Self::Standard => {
                let pulse_us =
                    SERVO_MIN_PULSE_US + fraction * (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US);
                pulse_us * (self.frequency() / 1_000_000.0) * 100.0
            }
            Self::SmallThrow => {
                let pulse_s = SMALL_SERVO_MIN_PULSE_S
                    + fraction * (SMALL_SERVO_MAX_PULSE_S - SMALL_SERVO_MIN_PULSE_S);
                pulse_s * self.frequency() * 100.0
            }
        }
    }
}

pub struct Servo {
    pwm: Box<dyn PwmChannel>,
    profile: ServoProfile,
    /// Last position fully travelled to
    position: u8,
    platform: Arc<dyn PlatformIo>,
    stop: StopToken,
    released: bool,
}

impl Servo {
    /// Claim the PWM line and hold the servo at `home`
    pub fn new(
        pin: u8,
        profile: ServoProfile,
        home: u8,
        platform: Arc<dyn PlatformIo>,
        stop: StopToken,
    ) -> std::result::Result<Self, HardwareError> {
        let home = home.min(100);
        let mut pwm = platform.open_pwm(pin, profile.frequency())?;
        if let Err(e) = pwm.start(profile.duty_for(home)) {
            if let Err(release_err) = pwm.release() {
                warn!("Failed to release servo pin {}: {}", pin, release_err);
            }
            return Err(e);
        }
        debug!("{:?} servo on pin {} homed at {}", profile, pin, home);
        Ok(Self {
            pwm,
            profile,
            position: home,
            platform,
            stop,
            released: false,
        })
    }

    pub fn profile(&self) -> ServoProfile {
        self.profile
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    /// Walk to `target` one unit at a time, blocking for
    /// `|target - position| * settle`. Ramped travel keeps the mechanism from
    /// slamming; a move to the current position does nothing.
    pub fn set_position(&mut self, target: u8) -> Result<()> {
        if target > 100 {
            return Err(ActuatorError::InvalidArgument(format!(
                "servo position {} is outside 0-100",
                target
            )));
        }
        if self.released {
            return Err(ActuatorError::Released);
        }

        let settle = self.profile.settle();
        while self.position != target {
            if self.stop.is_tripped() {
                warn!("Servo walk interrupted at {}", self.position);
                self.halt()?;
                return Err(ActuatorError::Halted);
            }
            let next = if target > self.position {
                self.position + 1
            } else {
                self.position - 1
            };
            let duty = self.profile.duty_for(next);
            if self.pwm.is_running() {
                self.pwm.set_duty(duty)?;
            } else {
                self.pwm.start(duty)?;
            }
            self.platform.sleep(settle);
            self.position = next;
        }

        info!("Servo at position {}", self.position);
        Ok(())
    }

    /// Small-throw latch: from 20 go to 10, from anywhere else go to 20
    pub fn toggle(&mut self) -> Result<()> {
        if self.profile != ServoProfile::SmallThrow {
            return Err(ActuatorError::Unsupported {
                kind: self.profile.kind(),
                operation: "toggle".to_string(),
            });
        }
        let target = if self.position == LATCH_OPEN {
            LATCH_CLOSED
        } else {
            LATCH_OPEN
        };
        self.set_position(target)
    }

    pub fn halt(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        ignore_released(self.pwm.stop())
    }

    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.pwm.release()?;
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

    fn servo(sim: &SimulatedPlatform, profile: ServoProfile, home: u8) -> Servo {
        Servo::new(32, profile, home, Arc::new(sim.clone()), StopToken::new()).unwrap()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_standard_endpoints() {
        // 500 us and 2500 us at 200 Hz
        assert_close(ServoProfile::Standard.duty_for(0), 10.0);
        assert_close(ServoProfile::Standard.duty_for(100), 50.0);
        assert_close(ServoProfile::Standard.duty_for(50), 30.0);
    }

    #[test]
    fn test_small_throw_endpoints() {
        // 1 ms and 4 ms at 200 Hz
        assert_close(ServoProfile::SmallThrow.duty_for(0), 20.0);
        assert_close(ServoProfile::SmallThrow.duty_for(100), 80.0);
        assert_close(ServoProfile::SmallThrow.duty_for(10), 26.0);
    }

    #[test]
    fn test_construction_holds_home() {
        let sim = SimulatedPlatform::new();
        let servo = servo(&sim, ServoProfile::Standard, 50);

        let snapshot = sim.pin(32).unwrap();
        assert_eq!(snapshot.pwm_frequency, Some(SERVO_FREQ_HZ));
        assert!(snapshot.pwm_running);
        assert_close(snapshot.duty, 30.0);
        assert_eq!(servo.position(), 50);
    }

    #[test]
    fn test_walk_visits_every_unit() {
        let sim = SimulatedPlatform::new();
        let mut servo = servo(&sim, ServoProfile::Standard, 50);

        servo.set_position(54).unwrap();
        servo.set_position(52).unwrap();

        let history = sim.pin(32).unwrap().duty_history;
        let expected: Vec<f64> = [50, 51, 52, 53, 54, 53, 52]
            .iter()
            .map(|&p| ServoProfile::Standard.duty_for(p))
            .collect();
        assert_eq!(history.len(), expected.len());
        for (actual, expected) in history.iter().zip(&expected) {
            assert_close(*actual, *expected);
        }
        assert_eq!(servo.position(), 52);
        assert_eq!(sim.elapsed(), SERVO_SETTLE * 6);
    }

    #[test]
    fn test_full_sweep_reaches_endpoints() {
        let sim = SimulatedPlatform::new();
        let mut servo = servo(&sim, ServoProfile::SmallThrow, 15);

        servo.set_position(0).unwrap();
        assert_close(sim.pin(32).unwrap().duty, 20.0);
        servo.set_position(100).unwrap();
        assert_close(sim.pin(32).unwrap().duty, 80.0);
        assert_eq!(sim.elapsed(), SMALL_SERVO_SETTLE * 115);
    }

    #[test]
    fn test_repeated_target_is_noop() {
        let sim = SimulatedPlatform::new();
        let mut servo = servo(&sim, ServoProfile::Standard, 0);

        for target in [0, 37, 100] {
            servo.set_position(target).unwrap();
            let writes = sim.pin(32).unwrap().duty_history.len();
            let elapsed = sim.elapsed();

            servo.set_position(target).unwrap();

            assert_eq!(sim.pin(32).unwrap().duty_history.len(), writes);
            assert_eq!(sim.elapsed(), elapsed);
            assert_eq!(servo.position(), target);
        }
    }

    #[test]
    fn test_out_of_range_rejected_before_motion() {
        let sim = SimulatedPlatform::new();
        let mut servo = servo(&sim, ServoProfile::Standard, 50);

        assert!(matches!(
            servo.set_position(101),
            Err(ActuatorError::InvalidArgument(_))
        ));
        assert_eq!(servo.position(), 50);
        assert_eq!(sim.pin(32).unwrap().duty_history.len(), 1);
    }

    #[test]
    fn test_toggle_alternates_between_latch_positions() {
        let sim = SimulatedPlatform::new();
        let mut servo = servo(&sim, ServoProfile::SmallThrow, 15);

        servo.toggle().unwrap();
        assert_eq!(servo.position(), LATCH_OPEN);

        let mut seen = Vec::new();
        for _ in 0..4 {
            servo.toggle().unwrap();
            seen.push(servo.position());
        }
        assert_eq!(seen, vec![10, 20, 10, 20]);
    }

    #[test]
    fn test_toggle_from_closed_and_far_positions() {
        let sim = SimulatedPlatform::new();
        let mut closed = servo(&sim, ServoProfile::SmallThrow, 10);
        closed.toggle().unwrap();
        assert_eq!(closed.position(), 20);

        let sim = SimulatedPlatform::new();
        let mut far = servo(&sim, ServoProfile::SmallThrow, 90);
        far.toggle().unwrap();
        assert_eq!(far.position(), 20);
        far.toggle().unwrap();
        assert_eq!(far.position(), 10);
    }

    #[test]
    fn test_walk_restarts_halted_pwm() {
        let sim = SimulatedPlatform::new();
        let mut servo = servo(&sim, ServoProfile::Standard, 50);

        servo.halt().unwrap();
        assert!(!sim.pin(32).unwrap().pwm_running);

        servo.set_position(51).unwrap();
        assert!(sim.pin(32).unwrap().pwm_running);
    }

    #[test]
    fn test_tripped_token_zeroes_pwm_and_halts() {
        let sim = SimulatedPlatform::new();
        let stop = StopToken::new();
        let mut servo =
            Servo::new(32, ServoProfile::Standard, 50, Arc::new(sim.clone()), stop.clone()).unwrap();
        stop.trip();

        assert!(matches!(servo.set_position(80), Err(ActuatorError::Halted)));
        assert_eq!(servo.position(), 50);
        assert!(sim.pin(32).unwrap().is_zeroed());
    }

    #[test]
    fn test_release_stops_pwm() {
        let sim = SimulatedPlatform::new();
        let mut servo = servo(&sim, ServoProfile::Standard, 50);

        servo.release().unwrap();
        let snapshot = sim.pin(32).unwrap();
        assert!(snapshot.is_zeroed());
        assert!(!snapshot.claimed);
        assert!(matches!(servo.set_position(10), Err(ActuatorError::Released)));
    }
}
