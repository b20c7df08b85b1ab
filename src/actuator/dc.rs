// Brushed DC motor on a two-input H-bridge (L298N/DRV8833-style)
//
// Each bridge input gets its own PWM line; one carries the duty cycle while
// the other is held at zero. Runs are time-bounded and stop themselves.
// An emergency stop zeroes both lines within one hold slice, but the run
// still returns only after its full duration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{ignore_released, ActuatorError, Result, StopToken};
use crate::config::{DC_HOLD_SLICE, DC_PWM_FREQ_HZ};
use crate::io::{HardwareError, PlatformIo, PwmChannel};

pub struct DcMotor {
    forward: Box<dyn PwmChannel>,
    reverse: Box<dyn PwmChannel>,
    platform: Arc<dyn PlatformIo>,
    stop: StopToken,
    released: bool,
}

impl DcMotor {
    pub fn new(
        forward_pin: u8,
        reverse_pin: u8,
        platform: Arc<dyn PlatformIo>,
        stop: StopToken,
    ) -> std::result::Result<Self, HardwareError> {
        let mut forward = platform.open_pwm(forward_pin, DC_PWM_FREQ_HZ)?;
        let reverse = match platform.open_pwm(reverse_pin, DC_PWM_FREQ_HZ) {
            Ok(reverse) => reverse,
            Err(e) => {
                if let Err(release_err) = forward.release() {
                    warn!("Failed to release pin {}: {}", forward_pin, release_err);
                }
                return Err(e);
            }
        };
        Ok(Self {
            forward,
            reverse,
            platform,
            stop,
            released: false,
        })
    }

    pub fn forward_duty(&self) -> f64 {
        self.forward.duty()
    }

    pub fn reverse_duty(&self) -> f64 {
        self.reverse.duty()
    }

    /// Drive at `speed` percent (negative = reverse) for `duration` seconds,
    /// then stop both lines. Blocks for the whole duration, even when an
    /// emergency stop zeroes the lines part way (then fails with `Halted`).
    pub fn run(&mut self, speed: i32, duration: f64) -> Result<()> {
        if speed.unsigned_abs() > 100 {
            return Err(ActuatorError::InvalidArgument(format!(
                "speed {} is outside -100..100",
                speed
            )));
        }
        let hold = Duration::try_from_secs_f64(duration).map_err(|_| {
            ActuatorError::InvalidArgument(format!(
                "run duration must be a non-negative number of seconds, got {}",
                duration
            ))
        })?;
        if self.released {
            return Err(ActuatorError::Released);
        }
        if self.stop.is_tripped() {
            return Err(ActuatorError::Halted);
        }

        info!("DC motor at {}% for {}s", speed, duration);
        if let Err(e) = self.drive(speed) {
            if let Err(halt_err) = self.halt() {
                warn!("Failed to stop DC motor after drive error: {}", halt_err);
            }
            return Err(e.into());
        }
        let interrupted = self.hold(hold)?;
        self.halt()?;
        if interrupted {
            return Err(ActuatorError::Halted);
        }
        Ok(())
    }

    /// Sleep out `hold` in slices. Once the stop token trips, both lines are
    /// zeroed and the rest of the hold is slept with the bridge off.
    fn hold(&mut self, hold: Duration) -> Result<bool> {
        let mut remaining = hold;
        let mut interrupted = false;
        while !remaining.is_zero() {
            if !interrupted && self.stop.is_tripped() {
                warn!("DC motor zeroed by emergency stop, {:?} of hold left", remaining);
                self.halt()?;
                interrupted = true;
            }
            let slice = remaining.min(DC_HOLD_SLICE);
            self.platform.sleep(slice);
            remaining -= slice;
        }
        Ok(interrupted)
    }

    fn drive(&mut self, speed: i32) -> std::result::Result<(), HardwareError> {
        let (active, idle) = if speed < 0 {
            (&mut self.reverse, &mut self.forward)
        } else {
            (&mut self.forward, &mut self.reverse)
        };
        idle.start(0.0)?;
        active.start(f64::from(speed.unsigned_abs()))
    }

    pub fn halt(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let forward = ignore_released(self.forward.stop());
        let reverse = ignore_released(self.reverse.stop());
        forward.and(reverse)
    }

    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let forward = self.forward.release();
        let reverse = self.reverse.release();
        forward?;
        reverse?;
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
    use std::time::Instant;

    fn motor(sim: &SimulatedPlatform) -> DcMotor {
        DcMotor::new(35, 37, Arc::new(sim.clone()), StopToken::new()).unwrap()
    }

    #[test]
    fn test_reverse_run_drives_only_reverse_line() {
        let sim = SimulatedPlatform::new();
        let mut motor = motor(&sim);

        motor.run(-20, 5.0).unwrap();

        let forward = sim.pin(35).unwrap();
        let reverse = sim.pin(37).unwrap();
        assert_eq!(forward.duty_history, vec![0.0]);
        assert_eq!(reverse.duty_history, vec![20.0]);
        assert!(forward.is_zeroed() && reverse.is_zeroed());
        assert_eq!(sim.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_forward_run_drives_only_forward_line() {
        let sim = SimulatedPlatform::new();
        let mut motor = motor(&sim);

        motor.run(80, 0.5).unwrap();

        assert_eq!(sim.pin(35).unwrap().duty_history, vec![80.0]);
        assert_eq!(sim.pin(37).unwrap().duty_history, vec![0.0]);
        assert_eq!(motor.forward_duty(), 0.0);
        assert_eq!(motor.reverse_duty(), 0.0);
        assert!(sim.pin(35).unwrap().is_zeroed());
    }

    #[test]
    fn test_zero_speed_counts_as_forward() {
        let sim = SimulatedPlatform::new();
        let mut motor = motor(&sim);

        motor.run(0, 0.0).unwrap();

        assert_eq!(sim.pin(35).unwrap().duty_history, vec![0.0]);
        assert_eq!(sim.pin(37).unwrap().duty_history, vec![0.0]);
        assert_eq!(sim.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_out_of_range_arguments_rejected() {
        let sim = SimulatedPlatform::new();
        let mut motor = motor(&sim);

        assert!(matches!(motor.run(101, 1.0), Err(ActuatorError::InvalidArgument(_))));
        assert!(matches!(motor.run(-101, 1.0), Err(ActuatorError::InvalidArgument(_))));
        assert!(matches!(motor.run(50, -0.1), Err(ActuatorError::InvalidArgument(_))));
        assert!(matches!(
            motor.run(50, f64::NAN),
            Err(ActuatorError::InvalidArgument(_))
        ));
        assert!(sim.pin(35).unwrap().duty_history.is_empty());
        assert_eq!(sim.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_unrepresentable_duration_rejected_before_driving() {
        let sim = SimulatedPlatform::new();
        let mut motor = motor(&sim);

        assert!(matches!(motor.run(60, 1e20), Err(ActuatorError::InvalidArgument(_))));
        assert!(matches!(
            motor.run(60, f64::INFINITY),
            Err(ActuatorError::InvalidArgument(_))
        ));
        assert!(sim.pin(35).unwrap().duty_history.is_empty());
        assert!(sim.pin(35).unwrap().is_zeroed());
    }

    #[test]
    fn test_tripped_token_refuses_new_run() {
        let sim = SimulatedPlatform::new();
        let stop = StopToken::new();
        let mut motor = DcMotor::new(35, 37, Arc::new(sim.clone()), stop.clone()).unwrap();
        stop.trip();

        assert!(matches!(motor.run(50, 1.0), Err(ActuatorError::Halted)));
        assert!(sim.pin(35).unwrap().duty_history.is_empty());
        assert_eq!(sim.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_emergency_stop_zeroes_lines_but_hold_elapses() {
        let sim = SimulatedPlatform::real_time();
        let stop = StopToken::new();
        let mut motor = DcMotor::new(35, 37, Arc::new(sim.clone()), stop.clone()).unwrap();
        let started = Instant::now();

        std::thread::scope(|scope| {
            let worker = scope.spawn(|| motor.run(60, 0.6));
            std::thread::sleep(Duration::from_millis(100));
            stop.trip();
            std::thread::sleep(Duration::from_millis(100));

            assert!(sim.pin(35).unwrap().is_zeroed());
            assert!(sim.pin(37).unwrap().is_zeroed());
            assert!(matches!(worker.join().unwrap(), Err(ActuatorError::Halted)));
        });

        assert!(started.elapsed() >= Duration::from_millis(600));
        assert_eq!(sim.pin(35).unwrap().duty_history, vec![60.0]);
    }

    #[test]
    fn test_drive_failure_stops_other_line() {
        let sim = SimulatedPlatform::new();
        let mut motor = motor(&sim);
        sim.fail_pin(35);

        assert!(matches!(motor.run(-40, 1.0), Err(ActuatorError::Hardware(_))));
        assert!(sim.pin(37).unwrap().is_zeroed());
        assert_eq!(sim.elapsed(), Duration::ZERO);
    }
}
