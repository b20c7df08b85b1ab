use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use torque_arm_runtime::config::DEFAULT_CONFIG_PATH;
use torque_arm_runtime::io::{is_safe_board_pin, PlatformIo, SimulatedPlatform};
use torque_arm_runtime::{panel, CommandRequest, MotionController, RigConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Torque Arm actuator control
#[derive(Parser)]
#[command(name = "torque-arm", version)]
struct Cli {
    /// Rig configuration (JSON). Defaults to ./torque-arm.json, then the built-in table
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated platform instead of real GPIO
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Validate the configuration and print the actuator table (no hardware I/O)
    Check,
    /// Run one command and print the resulting state as JSON
    Command {
        actuator: String,
        op: String,
        /// Operation argument, e.g. --arg steps=200 --arg delay=0.002
        #[arg(long = "arg", value_parser = parse_key_value)]
        args: Vec<(String, Value)>,
    },
    /// Interactive keyboard control panel
    Panel,
}

/// Parse `key=value`; values that are valid JSON (numbers, booleans) keep their type
fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.mode {
        Mode::Check => {
            config.validate(is_safe_board_pin)?;
            config.validate_buttons()?;
            for (name, actuator) in &config.actuators {
                println!("{:<16} {:<12} pins {:?}", name, actuator.kind().as_str(), actuator.pins());
            }
            println!("Configuration OK");
            Ok(())
        }
        Mode::Command { actuator, op, args } => {
            let controller = Arc::new(MotionController::new(&config, open_platform(cli.simulate)?)?);
            let request = args
                .into_iter()
                .fold(CommandRequest::new(&actuator, &op), |request, (key, value)| {
                    request.arg(&key, value)
                });
            let result = run_command(&controller, request).await;
            teardown(controller);
            result
        }
        Mode::Panel => {
            config.validate_buttons()?;
            let controller = Arc::new(MotionController::new(&config, open_platform(cli.simulate)?)?);

            enable_raw_mode()?;
            let result = panel::run(Arc::clone(&controller), &config.buttons).await;
            disable_raw_mode()?;

            teardown(controller);
            result
        }
    }
}

/// Run a single command on a worker; Ctrl+C triggers an emergency stop
async fn run_command(controller: &Arc<MotionController>, request: CommandRequest) -> Result<(), BoxError> {
    let worker = {
        let controller = Arc::clone(controller);
        tokio::task::spawn_blocking(move || controller.execute(&request))
    };

    tokio::select! {
        joined = worker => {
            let state = joined??;
            println!("{}", serde_json::to_string(&state)?);
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping all actuators");
            let stopper = Arc::clone(controller);
            let errors = tokio::task::spawn_blocking(move || stopper.emergency_stop_all()).await?;
            panel::report_stop(&errors);
            Err("interrupted".into())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RigConfig, BoxError> {
    match path {
        Some(path) => Ok(RigConfig::load(path)?),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Ok(RigConfig::load(Path::new(DEFAULT_CONFIG_PATH))?)
        }
        None => {
            info!("No config file, using built-in Torque Arm table");
            Ok(RigConfig::torque_arm())
        }
    }
}

#[cfg(feature = "gpio-hardware")]
fn open_platform(simulate: bool) -> Result<Arc<dyn PlatformIo>, BoxError> {
    if simulate {
        return Ok(Arc::new(SimulatedPlatform::real_time()));
    }
    Ok(Arc::new(torque_arm_runtime::io::RpiPlatform::new()?))
}

#[cfg(not(feature = "gpio-hardware"))]
fn open_platform(simulate: bool) -> Result<Arc<dyn PlatformIo>, BoxError> {
    if !simulate {
        warn!("Built without the gpio-hardware feature, using the simulated platform");
    }
    Ok(Arc::new(SimulatedPlatform::real_time()))
}

/// Release every line, owning the controller if no worker still holds it
fn teardown(controller: Arc<MotionController>) {
    let errors = match Arc::try_unwrap(controller) {
        Ok(controller) => controller.shutdown(),
        Err(shared) => shared.emergency_stop_all(),
    };
    for error in errors {
        warn!("Failed to release {}", error);
    }
}
