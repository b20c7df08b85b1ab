// Actuator control for the Torque Arm / node magazine rig
//
// Layers, leaves first:
// - io: digital ports, PWM channels, platform context (simulated or Raspberry Pi)
// - actuator: stepper, servo, DC motor, solenoid
// - controller: named actuators, command dispatch, emergency stop
// - panel: keyboard front end

pub mod actuator;
pub mod config;
pub mod controller;
pub mod io;
pub mod messages;
pub mod panel;

pub use actuator::{Actuator, ActuatorError, ActuatorKind, Operation};
pub use config::{ActuatorConfig, ConfigError, RigConfig};
pub use controller::{BuildError, CommandError, MotionController, StopError};
pub use messages::{ActuatorState, CommandRequest};
