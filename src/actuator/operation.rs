// Command parsing: (op name, JSON args) -> typed operation
use serde_json::{Map, Value};

use super::{ActuatorError, ActuatorKind, Result};
use crate::config::DEFAULT_STEP_DELAY;

/// A typed actuator command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    /// Stepper: signed step count, half-period in seconds
    Move { steps: i32, delay: f64 },
    /// Servo: logical position 0-100
    SetPosition { position: u8 },
    /// Small servo: flip between the two latch positions
    Toggle,
    /// DC motor: signed duty percentage, hold time in seconds
    Run { speed: i32, duration: f64 },
    Open,
    Close,
    /// Zero outputs without releasing lines
    Stop,
    /// Report state only
    State,
}

impl Operation {
    /// Parse an operation for an actuator of `kind`.
    ///
    /// Unknown names (for this kind) fail with `Unsupported`, bad or missing
    /// arguments with `InvalidArgument`. Nothing here touches hardware.
    pub fn parse(kind: ActuatorKind, op: &str, args: &Map<String, Value>) -> Result<Self> {
        if !kind.supports(op) {
            return Err(ActuatorError::Unsupported {
                kind,
                operation: op.to_string(),
            });
        }

        let operation = match op {
            "move" => Self::Move {
                steps: int_arg(args, "steps")?,
                delay: float_arg(args, "delay")?.unwrap_or(DEFAULT_STEP_DELAY),
            },
            "set_position" => {
                let position: i64 = required(args, "position", int_value)?;
                Self::SetPosition {
                    position: u8::try_from(position)
                        .ok()
                        .filter(|&p| p <= 100)
                        .ok_or_else(|| {
                            invalid(format!("position {} is outside 0-100", position))
                        })?,
                }
            }
            "toggle" => Self::Toggle,
            "run" => Self::Run {
                speed: int_arg(args, "speed")?,
                duration: float_arg(args, "duration")?
                    .ok_or_else(|| invalid("missing argument 'duration'".to_string()))?,
            },
            "open" => Self::Open,
            "close" => Self::Close,
            "stop" => Self::Stop,
            "state" => Self::State,
            other => {
                return Err(ActuatorError::Unsupported {
                    kind,
                    operation: other.to_string(),
                });
            }
        };
        Ok(operation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::SetPosition { .. } => "set_position",
            Self::Toggle => "toggle",
            Self::Run { .. } => "run",
            Self::Open => "open",
            Self::Close => "close",
            Self::Stop => "stop",
            Self::State => "state",
        }
    }
}

fn invalid(detail: String) -> ActuatorError {
    ActuatorError::InvalidArgument(detail)
}

fn required<T>(
    args: &Map<String, Value>,
    key: &str,
    convert: fn(&str, &Value) -> Result<T>,
) -> Result<T> {
    let value = args
        .get(key)
        .ok_or_else(|| invalid(format!("missing argument '{}'", key)))?;
    convert(key, value)
}

fn int_value(key: &str, value: &Value) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| invalid(format!("'{}' must be an integer, got {}", key, value)))
}

fn float_value(key: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| invalid(format!("'{}' must be a number, got {}", key, value)))
}

fn int_arg(args: &Map<String, Value>, key: &str) -> Result<i32> {
    let value = required(args, key, int_value)?;
    i32::try_from(value).map_err(|_| invalid(format!("'{}' = {} is out of range", key, value)))
}

fn float_arg(args: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    args.get(key).map(|value| float_value(key, value)).transpose()
}
