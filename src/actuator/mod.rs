// Actuators for the Torque Arm rig
//
// Provides:
// - Stepper (step/direction driver), Servo (standard and small-throw profiles),
//   DcMotor (two-line H-bridge), Solenoid
// - Actuator: closed set of variants behind one command surface
// - Operation parsing from (op, args) pairs

mod dc;
mod operation;
mod servo;
mod solenoid;
mod stepper;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ActuatorConfig;
use crate::io::{HardwareError, PlatformIo};
use crate::messages::ActuatorState;

pub use dc::DcMotor;
pub use operation::Operation;
pub use servo::{Servo, ServoProfile};
pub use solenoid::Solenoid;
pub use stepper::Stepper;

/// Actuator variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    Stepper,
    Servo,
    SmallServo,
    DcMotor,
    Solenoid,
}

impl ActuatorKind {
    /// Operation names accepted by this kind
    pub fn operations(self) -> &'static [&'static str] {
        match self {
            Self::Stepper => &["move", "stop", "state"],
            Self::Servo => &["set_position", "stop", "state"],
            Self::SmallServo => &["set_position", "toggle", "stop", "state"],
            Self::DcMotor => &["run", "stop", "state"],
            Self::Solenoid => &["open", "close", "stop", "state"],
        }
    }

    pub fn supports(self, op: &str) -> bool {
        self.operations().contains(&op)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stepper => "stepper",
            Self::Servo => "servo",
            Self::SmallServo => "small_servo",
            Self::DcMotor => "dc_motor",
            Self::Solenoid => "solenoid",
        }
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for actuator operations
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} does not support '{operation}'")]
    Unsupported { kind: ActuatorKind, operation: String },

    #[error("Motion halted by emergency stop")]
    Halted,

    #[error("Actuator has been released")]
    Released,

    #[error("Hardware failure: {0}")]
    Hardware(#[from] HardwareError),
}

pub type Result<T> = std::result::Result<T, ActuatorError>;

/// Shared emergency-stop flag.
///
/// Motion loops poll it between pulses, unit steps and DC hold slices. A
/// sleep that has already started always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Treat an already-released line as already zeroed
pub(crate) fn ignore_released(result: std::result::Result<(), HardwareError>) -> Result<()> {
    match result {
        Ok(()) | Err(HardwareError::Released { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// One configured actuator
pub enum Actuator {
    Stepper(Stepper),
    Servo(Servo),
    DcMotor(DcMotor),
    Solenoid(Solenoid),
}

impl Actuator {
    /// Claim the configured lines and drive them to their idle state
    pub fn build(
        config: &ActuatorConfig,
        platform: &Arc<dyn PlatformIo>,
        stop: &StopToken,
    ) -> Result<Self> {
        let platform = Arc::clone(platform);
        let actuator = match *config {
            ActuatorConfig::Stepper { step_pin, dir_pin } => {
                Self::Stepper(Stepper::new(step_pin, dir_pin, platform, stop.clone())?)
            }
            ActuatorConfig::Servo { pin, home } => Self::Servo(Servo::new(
                pin,
                ServoProfile::Standard,
                home,
                platform,
                stop.clone(),
            )?),
            ActuatorConfig::SmallServo { pin, home } => Self::Servo(Servo::new(
                pin,
                ServoProfile::SmallThrow,
                home,
                platform,
                stop.clone(),
            )?),
            ActuatorConfig::DcMotor {
                forward_pin,
                reverse_pin,
            } => Self::DcMotor(DcMotor::new(
                forward_pin,
                reverse_pin,
                platform,
                stop.clone(),
            )?),
            ActuatorConfig::Solenoid { pin } => Self::Solenoid(Solenoid::new(pin, platform)?),
        };
        Ok(actuator)
    }

    pub fn kind(&self) -> ActuatorKind {
        match self {
            Self::Stepper(_) => ActuatorKind::Stepper,
            Self::Servo(servo) => servo.profile().kind(),
            Self::DcMotor(_) => ActuatorKind::DcMotor,
            Self::Solenoid(_) => ActuatorKind::Solenoid,
        }
    }

    /// Run one operation to completion (blocking) and report the new state
    pub fn execute(&mut self, operation: Operation) -> Result<ActuatorState> {
        debug!("{} executing {:?}", self.kind(), operation);
        match operation {
            Operation::State => return Ok(self.state()),
            Operation::Stop => {
                self.halt()?;
                return Ok(self.state());
            }
            _ => {}
        }
        match (&mut *self, operation) {
            (Self::Stepper(stepper), Operation::Move { steps, delay }) => {
                stepper.move_by(steps, delay)?
            }
            (Self::Servo(servo), Operation::SetPosition { position }) => {
                servo.set_position(position)?
            }
            (Self::Servo(servo), Operation::Toggle) => servo.toggle()?,
            (Self::DcMotor(motor), Operation::Run { speed, duration }) => {
                motor.run(speed, duration)?
            }
            (Self::Solenoid(solenoid), Operation::Open) => solenoid.open()?,
            (Self::Solenoid(solenoid), Operation::Close) => solenoid.close()?,
            (actuator, operation) => {
                return Err(ActuatorError::Unsupported {
                    kind: actuator.kind(),
                    operation: operation.name().to_string(),
                });
            }
        }
        Ok(self.state())
    }

    /// Zero every output but keep the lines claimed. No-op once released.
    pub fn halt(&mut self) -> Result<()> {
        match self {
            Self::Stepper(stepper) => stepper.halt(),
            Self::Servo(servo) => servo.halt(),
            Self::DcMotor(motor) => motor.halt(),
            Self::Solenoid(solenoid) => solenoid.halt(),
        }
    }

    /// Zero outputs and return every line to the platform. Idempotent.
    ///
    /// If any line fails, the actuator stays unreleased so a later call
    /// retries (and reports) the failing line.
    pub fn release(&mut self) -> Result<()> {
        match self {
            Self::Stepper(stepper) => stepper.release(),
            Self::Servo(servo) => servo.release(),
            Self::DcMotor(motor) => motor.release(),
            Self::Solenoid(solenoid) => solenoid.release(),
        }
    }

    pub fn is_released(&self) -> bool {
        match self {
            Self::Stepper(stepper) => stepper.is_released(),
            Self::Servo(servo) => servo.is_released(),
            Self::DcMotor(motor) => motor.is_released(),
            Self::Solenoid(solenoid) => solenoid.is_released(),
        }
    }

    pub fn state(&self) -> ActuatorState {
        match self {
            Self::Stepper(stepper) => ActuatorState::Stepper {
                position: stepper.position(),
            },
            Self::Servo(servo) => match servo.profile() {
                ServoProfile::Standard => ActuatorState::Servo {
                    position: servo.position(),
                },
                ServoProfile::SmallThrow => ActuatorState::SmallServo {
                    position: servo.position(),
                },
            },
            Self::DcMotor(motor) => ActuatorState::DcMotor {
                forward_duty: motor.forward_duty(),
                reverse_duty: motor.reverse_duty(),
            },
            Self::Solenoid(solenoid) => ActuatorState::Solenoid {
                open: solenoid.is_open(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedPlatform;

    fn build(config: ActuatorConfig) -> (SimulatedPlatform, Actuator) {
        let sim = SimulatedPlatform::new();
        let platform: Arc<dyn PlatformIo> = Arc::new(sim.clone());
        let actuator = Actuator::build(&config, &platform, &StopToken::new()).unwrap();
        (sim, actuator)
    }

    #[test]
    fn test_kind_follows_config() {
        let (_, servo) = build(ActuatorConfig::SmallServo { pin: 32, home: 15 });
        assert_eq!(servo.kind(), ActuatorKind::SmallServo);
        let (_, motor) = build(ActuatorConfig::DcMotor {
            forward_pin: 35,
            reverse_pin: 37,
        });
        assert_eq!(motor.kind(), ActuatorKind::DcMotor);
    }

    #[test]
    fn test_mismatched_operation_is_unsupported() {
        let (_, mut solenoid) = build(ActuatorConfig::Solenoid { pin: 36 });
        let result = solenoid.execute(Operation::Move {
            steps: 10,
            delay: 0.001,
        });
        assert!(matches!(
            result,
            Err(ActuatorError::Unsupported {
                kind: ActuatorKind::Solenoid,
                ..
            })
        ));
    }

    #[test]
    fn test_standard_servo_cannot_toggle() {
        let (_, mut servo) = build(ActuatorConfig::Servo { pin: 26, home: 50 });
        assert!(matches!(
            servo.execute(Operation::Toggle),
            Err(ActuatorError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_stop_zeroes_but_keeps_lines() {
        let (sim, mut solenoid) = build(ActuatorConfig::Solenoid { pin: 36 });
        solenoid.execute(Operation::Open).unwrap();
        let state = solenoid.execute(Operation::Stop).unwrap();

        assert_eq!(state, ActuatorState::Solenoid { open: false });
        let snapshot = sim.pin(36).unwrap();
        assert!(snapshot.is_zeroed());
        assert!(snapshot.claimed);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (sim, mut stepper) = build(ActuatorConfig::Stepper {
            step_pin: 38,
            dir_pin: 40,
        });
        stepper.release().unwrap();
        stepper.release().unwrap();
        stepper.halt().unwrap();

        assert!(stepper.is_released());
        assert!(!sim.pin(38).unwrap().claimed);
        assert!(matches!(
            stepper.execute(Operation::Move {
                steps: 1,
                delay: 0.001
            }),
            Err(ActuatorError::Released)
        ));
    }

    #[test]
    fn test_stop_token_roundtrip() {
        let token = StopToken::new();
        let shared = token.clone();
        assert!(!shared.is_tripped());
        token.trip();
        assert!(shared.is_tripped());
        token.trip();
        assert!(token.is_tripped());
    }
}
