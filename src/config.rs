// Calibration constants, pin assignment table, panel buttons
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::actuator::ActuatorKind;

// Servo calibration (standard profile)
pub const SERVO_FREQ_HZ: f64 = 200.0;
pub const SERVO_MIN_PULSE_US: f64 = 500.0;
pub const SERVO_MAX_PULSE_US: f64 = 2500.0;
pub const SERVO_SETTLE: Duration = Duration::from_millis(100);
pub const SERVO_HOME: u8 = 50;

// Small-throw servo calibration (flange latch)
pub const SMALL_SERVO_FREQ_HZ: f64 = SERVO_FREQ_HZ;
pub const SMALL_SERVO_MIN_PULSE_S: f64 = 1e-3;
pub const SMALL_SERVO_MAX_PULSE_S: f64 = 4e-3;
pub const SMALL_SERVO_SETTLE: Duration = Duration::from_millis(300);
pub const SMALL_SERVO_HOME: u8 = 15;

// Latch positions used by the small servo toggle
pub const LATCH_CLOSED: u8 = 10;
pub const LATCH_OPEN: u8 = 20;

// H-bridge PWM frequency for the DC tray motors
pub const DC_PWM_FREQ_HZ: f64 = 50.0;
// Granularity at which a DC hold notices an emergency stop
pub const DC_HOLD_SLICE: Duration = Duration::from_millis(10);

// Stepper half-period when a move does not give one (seconds)
pub const DEFAULT_STEP_DELAY: f64 = 0.003;

// Config file read by the binary when --config is not given
pub const DEFAULT_CONFIG_PATH: &str = "torque-arm.json";

// Panel keys with a fixed meaning (emergency stop, help, quit)
pub const PANEL_RESERVED_KEYS: [char; 4] = ['x', 'h', '?', 'q'];

/// Pin binding for one actuator (board numbering)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorConfig {
    Stepper {
        step_pin: u8,
        dir_pin: u8,
    },
    Servo {
        pin: u8,
        #[serde(default = "default_servo_home")]
        home: u8,
    },
    SmallServo {
        pin: u8,
        #[serde(default = "default_small_servo_home")]
        home: u8,
    },
    DcMotor {
        forward_pin: u8,
        reverse_pin: u8,
    },
    Solenoid {
        pin: u8,
    },
}

fn default_servo_home() -> u8 {
    SERVO_HOME
}

fn default_small_servo_home() -> u8 {
    SMALL_SERVO_HOME
}

impl ActuatorConfig {
    pub fn kind(&self) -> ActuatorKind {
        match self {
            Self::Stepper { .. } => ActuatorKind::Stepper,
            Self::Servo { .. } => ActuatorKind::Servo,
            Self::SmallServo { .. } => ActuatorKind::SmallServo,
            Self::DcMotor { .. } => ActuatorKind::DcMotor,
            Self::Solenoid { .. } => ActuatorKind::Solenoid,
        }
    }

    /// Every pin this actuator binds
    pub fn pins(&self) -> Vec<u8> {
        match *self {
            Self::Stepper { step_pin, dir_pin } => vec![step_pin, dir_pin],
            Self::Servo { pin, .. } | Self::SmallServo { pin, .. } | Self::Solenoid { pin } => {
                vec![pin]
            }
            Self::DcMotor {
                forward_pin,
                reverse_pin,
            } => vec![forward_pin, reverse_pin],
        }
    }

    fn home(&self) -> Option<u8> {
        match *self {
            Self::Servo { home, .. } | Self::SmallServo { home, .. } => Some(home),
            _ => None,
        }
    }
}

/// A keyboard button on the control panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelButton {
    pub key: char,
    pub label: String,
    pub actuator: String,
    pub op: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl PanelButton {
    fn new(key: char, label: &str, actuator: &str, op: &str, args: Value) -> Self {
        Self {
            key,
            label: label.to_string(),
            actuator: actuator.to_string(),
            op: op.to_string(),
            args: match args {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// Actuator table plus panel layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    pub actuators: BTreeMap<String, ActuatorConfig>,
    #[serde(default)]
    pub buttons: Vec<PanelButton>,
}

/// One problem found while validating a rig configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("pin {pin} is bound by {actuators:?}")]
    DuplicatePin { pin: u8, actuators: Vec<String> },

    #[error("{actuator}: pin {pin} is not in the safe pin set")]
    UnsafePin { actuator: String, pin: u8 },

    #[error("{actuator}: home position {home} is outside 0-100")]
    HomeOutOfRange { actuator: String, home: u8 },

    #[error("button '{key}' targets unknown actuator {actuator}")]
    UnknownButtonTarget { key: char, actuator: String },

    #[error("key '{key}' is bound more than once")]
    DuplicateKey { key: char },

    #[error("key '{key}' is reserved by the panel")]
    ReservedKey { key: char },
}

/// Aggregated issues, printed one per line
#[derive(Debug, Clone, PartialEq)]
pub struct IssueList(pub Vec<ConfigIssue>);

impl fmt::Display for IssueList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.0 {
            write!(f, "\n  - {}", issue)?;
        }
        Ok(())
    }
}

/// Error types for configuration loading and validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration conflict:{0}")]
    Conflict(IssueList),

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Issues behind a `Conflict`, empty otherwise
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            Self::Conflict(list) => &list.0,
            _ => &[],
        }
    }
}

impl RigConfig {
    pub fn new() -> Self {
        Self {
            actuators: BTreeMap::new(),
            buttons: Vec::new(),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, actuator: ActuatorConfig) -> Self {
        self.actuators.insert(name.to_string(), actuator);
        self
    }

    /// Left side of the Torque Arm rig as wired on the bench
    pub fn torque_arm() -> Self {
        let mut config = Self::new()
            .with(
                "left_step",
                ActuatorConfig::Stepper {
                    step_pin: 38,
                    dir_pin: 40,
                },
            )
            .with(
                "left_flange",
                ActuatorConfig::SmallServo {
                    pin: 32,
                    home: SMALL_SERVO_HOME,
                },
            )
            .with(
                "left_elevator",
                ActuatorConfig::Servo {
                    pin: 26,
                    home: SERVO_HOME,
                },
            )
            .with(
                "left_tray",
                ActuatorConfig::DcMotor {
                    forward_pin: 35,
                    reverse_pin: 37,
                },
            )
            .with("left_solenoid", ActuatorConfig::Solenoid { pin: 36 });

        config.buttons = vec![
            PanelButton::new('f', "Flange open/close", "left_flange", "toggle", json!({})),
            PanelButton::new('e', "Elevator up", "left_elevator", "set_position", json!({"position": 100})),
            PanelButton::new('n', "Elevator neutral", "left_elevator", "set_position", json!({"position": 50})),
            PanelButton::new('d', "Elevator down", "left_elevator", "set_position", json!({"position": 0})),
            PanelButton::new('s', "Stepper +200", "left_step", "move", json!({"steps": 200})),
            PanelButton::new('a', "Stepper -200", "left_step", "move", json!({"steps": -200})),
            PanelButton::new('t', "Tray forward", "left_tray", "run", json!({"speed": 30, "duration": 1.0})),
            PanelButton::new('g', "Tray back", "left_tray", "run", json!({"speed": -30, "duration": 1.0})),
            PanelButton::new('o', "Solenoid open", "left_solenoid", "open", json!({})),
            PanelButton::new('c', "Solenoid close", "left_solenoid", "close", json!({})),
        ];
        config
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        info!(
            "Loaded {} actuators from {}",
            config.actuators.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check pin uniqueness, safe pins and servo homes.
    ///
    /// Pure: performs no hardware I/O. Reports every issue, not just the first.
    pub fn validate(&self, is_safe_pin: impl Fn(u8) -> bool) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        let mut users: BTreeMap<u8, Vec<String>> = BTreeMap::new();

        for (name, actuator) in &self.actuators {
            for pin in actuator.pins() {
                users.entry(pin).or_default().push(name.clone());
                if !is_safe_pin(pin) {
                    issues.push(ConfigIssue::UnsafePin {
                        actuator: name.clone(),
                        pin,
                    });
                }
            }
            if let Some(home) = actuator.home() {
                if home > 100 {
                    issues.push(ConfigIssue::HomeOutOfRange {
                        actuator: name.clone(),
                        home,
                    });
                }
            }
        }

        for (pin, actuators) in users {
            if actuators.len() > 1 {
                issues.push(ConfigIssue::DuplicatePin { pin, actuators });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Conflict(IssueList(issues)))
        }
    }

    /// Check that every button targets a configured actuator with a unique key
    pub fn validate_buttons(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        let mut seen = Vec::new();

        for button in &self.buttons {
            if !self.actuators.contains_key(&button.actuator) {
                issues.push(ConfigIssue::UnknownButtonTarget {
                    key: button.key,
                    actuator: button.actuator.clone(),
                });
            }
            if PANEL_RESERVED_KEYS.contains(&button.key) {
                issues.push(ConfigIssue::ReservedKey { key: button.key });
            }
            if seen.contains(&button.key) {
                issues.push(ConfigIssue::DuplicateKey { key: button.key });
            } else {
                seen.push(button.key);
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Conflict(IssueList(issues)))
        }
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self::torque_arm()
    }
}
