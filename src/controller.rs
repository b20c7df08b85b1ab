// Motion controller: named actuators, command dispatch, emergency stop
//
// Commands block their caller for the full physical motion. Front ends that
// want several actuators moving at once run each command on its own thread;
// commands for the same actuator never overlap (a second one is rejected).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::actuator::{Actuator, ActuatorError, ActuatorKind, Operation, StopToken};
use crate::config::{ConfigError, RigConfig};
use crate::io::{HardwareError, PlatformIo};
use crate::messages::{ActuatorState, CommandRequest};

/// Error types for the command surface
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("No actuator named '{0}'")]
    NotFound(String),

    #[error("{actuator} ({kind}) does not support '{operation}'")]
    UnsupportedOperation {
        actuator: String,
        kind: ActuatorKind,
        operation: String,
    },

    #[error("{actuator}: invalid argument: {detail}")]
    InvalidArgument { actuator: String, detail: String },

    #[error("{0} is busy with another command")]
    Busy(String),

    #[error("{0}: motion halted by emergency stop")]
    Halted(String),

    #[error("{0} has been released")]
    Released(String),

    #[error("{actuator}: hardware failure: {source}")]
    Hardware {
        actuator: String,
        source: HardwareError,
    },
}

impl CommandError {
    fn from_actuator(actuator: &str, err: ActuatorError) -> Self {
        let actuator = actuator.to_string();
        match err {
            ActuatorError::InvalidArgument(detail) => Self::InvalidArgument { actuator, detail },
            ActuatorError::Unsupported { kind, operation } => Self::UnsupportedOperation {
                actuator,
                kind,
                operation,
            },
            ActuatorError::Halted => Self::Halted(actuator),
            ActuatorError::Released => Self::Released(actuator),
            ActuatorError::Hardware(source) => Self::Hardware { actuator, source },
        }
    }
}

/// Failure to stop or release one actuator
#[derive(Debug, thiserror::Error)]
#[error("{actuator}: {source}")]
pub struct StopError {
    pub actuator: String,
    pub source: ActuatorError,
}

/// Error types for controller construction
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to set up {actuator}: {source}")]
    Hardware {
        actuator: String,
        source: ActuatorError,
    },
}

struct Slot {
    kind: ActuatorKind,
    actuator: Mutex<Actuator>,
}

/// Owns every actuator of the rig
pub struct MotionController {
    actuators: BTreeMap<String, Slot>,
    platform: Arc<dyn PlatformIo>,
    stop: StopToken,
}

impl MotionController {
    /// Validate the pin table, then claim every actuator's lines.
    ///
    /// Validation happens before any hardware I/O. If an actuator fails to
    /// come up, the ones already built are released and no controller is
    /// returned.
    pub fn new(config: &RigConfig, platform: Arc<dyn PlatformIo>) -> Result<Self, BuildError> {
        config.validate(|pin| platform.is_safe_pin(pin))?;

        info!(
            "Building {} actuators on {} platform",
            config.actuators.len(),
            platform.name()
        );
        let stop = StopToken::new();
        let mut built: Vec<(String, Actuator)> = Vec::with_capacity(config.actuators.len());

        for (name, actuator_config) in &config.actuators {
            match Actuator::build(actuator_config, &platform, &stop) {
                Ok(actuator) => {
                    info!("{} ready ({}, pins {:?})", name, actuator.kind(), actuator_config.pins());
                    built.push((name.clone(), actuator));
                }
                Err(source) => {
                    warn!("Failed to set up {}: {}", name, source);
                    for (built_name, mut actuator) in built {
                        if let Err(e) = actuator.release() {
                            warn!("Failed to release {}: {}", built_name, e);
                        }
                    }
                    return Err(BuildError::Hardware {
                        actuator: name.clone(),
                        source,
                    });
                }
            }
        }

        let actuators = built
            .into_iter()
            .map(|(name, actuator)| {
                let slot = Slot {
                    kind: actuator.kind(),
                    actuator: Mutex::new(actuator),
                };
                (name, slot)
            })
            .collect();

        Ok(Self {
            actuators,
            platform,
            stop,
        })
    }

    pub fn platform_name(&self) -> &str {
        self.platform.name()
    }

    /// Registered actuator names with their kinds
    pub fn actuators(&self) -> impl Iterator<Item = (&str, ActuatorKind)> {
        self.actuators
            .iter()
            .map(|(name, slot)| (name.as_str(), slot.kind))
    }

    /// Whether an emergency stop has been issued
    pub fn is_stopped(&self) -> bool {
        self.stop.is_tripped()
    }

    /// Run `op` on the named actuator, blocking until the motion completes.
    ///
    /// Arguments are checked before any hardware I/O. A command for an
    /// actuator that is already executing one fails with `Busy`.
    pub fn command(
        &self,
        name: &str,
        op: &str,
        args: &Map<String, Value>,
    ) -> Result<ActuatorState, CommandError> {
        let slot = self
            .actuators
            .get(name)
            .ok_or_else(|| CommandError::NotFound(name.to_string()))?;

        let operation = Operation::parse(slot.kind, op, args)
            .map_err(|e| CommandError::from_actuator(name, e))?;

        let mut actuator = match slot.actuator.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(CommandError::Busy(name.to_string())),
            // A panicked command leaves plain state behind; keep serving
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        info!("{} <- {} {:?}", name, op, args);
        actuator
            .execute(operation)
            .map_err(|e| CommandError::from_actuator(name, e))
    }

    pub fn execute(&self, request: &CommandRequest) -> Result<ActuatorState, CommandError> {
        self.command(&request.actuator, &request.op, &request.args)
    }

    /// Stop everything and release every line.
    ///
    /// Trips the stop token, releases every idle actuator, then waits for
    /// in-flight commands and releases theirs. A running command zeroes its
    /// own outputs at its next pulse, unit step or hold slice, but only
    /// returns once its current sleep is over. Keeps going past failures and
    /// returns all of them. Safe to call repeatedly: released actuators are
    /// skipped, and one that failed to release is retried (and reported) again.
    pub fn emergency_stop_all(&self) -> Vec<StopError> {
        warn!("Emergency stop requested");
        self.stop.trip();
        let errors = self.release_all();
        if errors.is_empty() {
            info!("All actuators stopped and released");
        }
        errors
    }

    /// Final teardown
    pub fn shutdown(mut self) -> Vec<StopError> {
        info!("Shutting down motion controller");
        self.stop.trip();
        let errors = self.release_all();
        self.actuators.clear();
        errors
    }

    fn release_all(&self) -> Vec<StopError> {
        let mut errors = Vec::new();
        let mut busy = Vec::new();

        // Idle actuators first, so a long hold never delays the rest
        for (name, slot) in &self.actuators {
            match slot.actuator.try_lock() {
                Ok(mut actuator) => release_one(name, &mut actuator, &mut errors),
                Err(TryLockError::Poisoned(poisoned)) => {
                    release_one(name, &mut poisoned.into_inner(), &mut errors)
                }
                Err(TryLockError::WouldBlock) => busy.push((name, slot)),
            }
        }

        // Running commands zero their own outputs once they see the token
        if !busy.is_empty() {
            info!("Waiting for {} running commands", busy.len());
        }
        for (name, slot) in busy {
            let mut actuator = slot
                .actuator
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            release_one(name, &mut actuator, &mut errors);
        }
        errors
    }
}

fn release_one(name: &str, actuator: &mut Actuator, errors: &mut Vec<StopError>) {
    if actuator.is_released() {
        return;
    }
    if let Err(source) = actuator.release() {
        warn!("Failed to stop {}: {}", name, source);
        errors.push(StopError {
            actuator: name.to_string(),
            source,
        });
    }
}

impl Drop for MotionController {
    fn drop(&mut self) {
        // Release lines when the controller goes away (safety measure)
        for error in self.release_all() {
            warn!("Failed to release on drop: {}", error);
        }
    }
}
