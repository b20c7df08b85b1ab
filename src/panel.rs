// Keyboard control panel: one key per button, X = emergency stop, Q = quit,
// Ctrl+C = emergency stop and quit
//
// Every button press runs its command on a blocking worker, so a long move
// on one actuator never freezes the panel or the other actuators.

use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PanelButton;
use crate::controller::{MotionController, StopError};
use crate::messages::CommandRequest;

// Key poll timeout (50 Hz effective rate)
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What a key press asks the panel to do
#[derive(Debug, PartialEq)]
pub enum PanelAction<'a> {
    Press(&'a PanelButton),
    EmergencyStop,
    /// Emergency stop, then leave the panel
    Abort,
    Help,
    Quit,
}

/// Map a key to its action. Reserved keys win over configured buttons, and
/// modified keys (raw mode delivers Ctrl+C as Ctrl + 'c') never press one.
pub fn action_for_key(
    buttons: &[PanelButton],
    code: KeyCode,
    modifiers: KeyModifiers,
) -> Option<PanelAction<'_>> {
    if modifiers.contains(KeyModifiers::CONTROL) {
        return match code {
            KeyCode::Char('c') | KeyCode::Char('C') => Some(PanelAction::Abort),
            _ => None,
        };
    }
    if modifiers.contains(KeyModifiers::ALT) {
        return None;
    }
    match code {
        KeyCode::Char('x') | KeyCode::Char('X') => Some(PanelAction::EmergencyStop),
        KeyCode::Char('q') | KeyCode::Esc => Some(PanelAction::Quit),
        KeyCode::Char('h') | KeyCode::Char('?') => Some(PanelAction::Help),
        KeyCode::Char(c) => buttons
            .iter()
            .find(|button| button.key == c)
            .map(PanelAction::Press),
        _ => None,
    }
}

/// Run the panel until the operator quits. Raw mode must already be enabled.
///
/// In-flight commands are awaited before returning; teardown of the
/// controller is left to the caller.
pub async fn run(
    controller: Arc<MotionController>,
    buttons: &[PanelButton],
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Panel started on {} platform", controller.platform_name());
    for (name, kind) in controller.actuators() {
        info!("  {} ({})", name, kind);
    }
    print_help(buttons);

    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    loop {
        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(KeyEvent {
                code,
                modifiers,
                kind,
                ..
            }) = event::read()?
            {
                if kind != KeyEventKind::Press {
                    continue;
                }
                match action_for_key(buttons, code, modifiers) {
                    Some(PanelAction::Press(button)) => {
                        in_flight.push(dispatch(&controller, button));
                    }
                    Some(PanelAction::EmergencyStop) => {
                        in_flight.push(stop_all(&controller));
                    }
                    Some(PanelAction::Abort) => {
                        warn!("Ctrl+C, stopping all actuators");
                        in_flight.push(stop_all(&controller));
                        break;
                    }
                    Some(PanelAction::Help) => print_help(buttons),
                    Some(PanelAction::Quit) => break,
                    None => {}
                }
            }
        }

        in_flight.retain(|handle| !handle.is_finished());
    }

    if !in_flight.is_empty() {
        info!("Waiting for {} running commands", in_flight.len());
    }
    for handle in in_flight {
        if let Err(e) = handle.await {
            warn!("Command worker failed: {}", e);
        }
    }
    Ok(())
}

/// Run a button's command on its own blocking worker
fn dispatch(controller: &Arc<MotionController>, button: &PanelButton) -> JoinHandle<()> {
    let controller = Arc::clone(controller);
    let request = CommandRequest::from(button);
    let label = button.label.clone();
    info!("{}...", label);

    tokio::task::spawn_blocking(move || match controller.execute(&request) {
        Ok(state) => info!("{} done: {:?}", label, state),
        Err(e) => warn!("{} failed: {}", label, e),
    })
}

fn stop_all(controller: &Arc<MotionController>) -> JoinHandle<()> {
    let controller = Arc::clone(controller);
    tokio::task::spawn_blocking(move || report_stop(&controller.emergency_stop_all()))
}

pub fn report_stop(errors: &[StopError]) {
    if errors.is_empty() {
        info!("Emergency stop complete, all outputs zeroed");
    } else {
        for error in errors {
            warn!("Emergency stop incomplete: {}", error);
        }
    }
}

fn print_help(buttons: &[PanelButton]) {
    for button in buttons {
        info!("[{}] {}", button.key, button.label);
    }
    info!("[x] EMERGENCY STOP  [h] help  [q] quit  [Ctrl+C] stop and quit");
}
