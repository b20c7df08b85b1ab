// Message types exchanged with front ends (panel, CLI)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::PanelButton;

// Command from panel/CLI -> controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub actuator: String,
    pub op: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl CommandRequest {
    pub fn new(actuator: &str, op: &str) -> Self {
        Self {
            actuator: actuator.to_string(),
            op: op.to_string(),
            args: Map::new(),
        }
    }

    /// Builder-style argument
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }
}

impl From<&PanelButton> for CommandRequest {
    fn from(button: &PanelButton) -> Self {
        Self {
            actuator: button.actuator.clone(),
            op: button.op.clone(),
            args: button.args.clone(),
        }
    }
}

/// State reported by an actuator after a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorState {
    Stepper { position: i64 },
    Servo { position: u8 },
    SmallServo { position: u8 },
    DcMotor { forward_duty: f64, reverse_duty: f64 },
    Solenoid { open: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_serializes_with_kind_tag() {
        let state = ActuatorState::Stepper { position: -12 };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"kind": "stepper", "position": -12})
        );
    }

    #[test]
    fn test_request_args_default_to_empty() {
        let request: CommandRequest =
            serde_json::from_str(r#"{"actuator": "left_flange", "op": "toggle"}"#).unwrap();
        assert_eq!(request, CommandRequest::new("left_flange", "toggle"));

        let request = CommandRequest::new("left_tray", "run")
            .arg("speed", 30)
            .arg("duration", 1.5);
        assert_eq!(request.args["speed"], json!(30));
        assert_eq!(request.args["duration"], json!(1.5));
    }
}
