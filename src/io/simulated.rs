// In-memory platform used for tests, `--simulate` runs and machines without GPIO
//
// Every line keeps an observable snapshot (level, duty history, rising edges,
// claim state) and motion delays advance a virtual clock unless real time is
// requested.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::{
    board_to_bcm, check_duty, DigitalPort, HardwareError, Level, PlatformIo, PortMode, Pull,
    PwmChannel, Result,
};

/// Observable state of one simulated line
#[derive(Debug, Clone, PartialEq)]
pub struct PinSnapshot {
    /// Digital mode while claimed as a port (None for PWM or released lines)
    pub mode: Option<PortMode>,
    pub level: Level,
    /// Set while claimed as a PWM channel
    pub pwm_frequency: Option<f64>,
    pub pwm_running: bool,
    pub duty: f64,
    /// Every duty cycle applied, in order
    pub duty_history: Vec<f64>,
    /// Low -> high transitions driven on the line
    pub rising_edges: u64,
    pub claimed: bool,
}

impl PinSnapshot {
    fn fresh() -> Self {
        Self {
            mode: None,
            level: Level::Low,
            pwm_frequency: None,
            pwm_running: false,
            duty: 0.0,
            duty_history: Vec::new(),
            rising_edges: 0,
            claimed: false,
        }
    }

    /// True when nothing is being driven on the line
    pub fn is_zeroed(&self) -> bool {
        self.level == Level::Low && !self.pwm_running && self.duty == 0.0
    }
}

#[derive(Default)]
struct SimState {
    pins: BTreeMap<u8, PinSnapshot>,
    inputs: BTreeMap<u8, Level>,
    failing: BTreeSet<u8>,
    failing_open: BTreeSet<u8>,
    elapsed: Duration,
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected_failure(pin: u8) -> HardwareError {
    HardwareError::WriteFailed {
        pin,
        reason: "injected failure".to_string(),
    }
}

/// Simulated GPIO platform. Clones share the same pin table and clock.
#[derive(Clone, Default)]
pub struct SimulatedPlatform {
    state: Shared,
    real_time: bool,
}

impl SimulatedPlatform {
    /// Platform with a virtual clock: `sleep` returns immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform whose `sleep` really blocks the calling thread
    pub fn real_time() -> Self {
        Self {
            state: Shared::default(),
            real_time: true,
        }
    }

    /// Snapshot of a line, if it was ever claimed
    pub fn pin(&self, pin: u8) -> Option<PinSnapshot> {
        lock(&self.state).pins.get(&pin).cloned()
    }

    /// Total time spent in `sleep` so far
    pub fn elapsed(&self) -> Duration {
        lock(&self.state).elapsed
    }

    /// Make every write, stop and release on `pin` fail
    pub fn fail_pin(&self, pin: u8) {
        lock(&self.state).failing.insert(pin);
    }

    pub fn heal_pin(&self, pin: u8) {
        lock(&self.state).failing.remove(&pin);
    }

    /// Make claiming `pin` fail
    pub fn fail_open(&self, pin: u8) {
        lock(&self.state).failing_open.insert(pin);
    }

    /// Level seen by an input port on `pin`
    pub fn set_input(&self, pin: u8, level: Level) {
        lock(&self.state).inputs.insert(pin, level);
    }

    fn claim(&self, pin: u8) -> Result<()> {
        if board_to_bcm(pin).is_none() {
            return Err(HardwareError::UnknownPin { pin });
        }
        let mut state = lock(&self.state);
        if state.failing_open.contains(&pin) {
            return Err(injected_failure(pin));
        }
        let snapshot = state.pins.entry(pin).or_insert_with(PinSnapshot::fresh);
        if snapshot.claimed {
            return Err(HardwareError::PinBusy { pin });
        }
        *snapshot = PinSnapshot {
            claimed: true,
            ..PinSnapshot::fresh()
        };
        Ok(())
    }
}

impl PlatformIo for SimulatedPlatform {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open_digital(&self, pin: u8, mode: PortMode) -> Result<Box<dyn DigitalPort>> {
        self.claim(pin)?;
        {
            let mut state = lock(&self.state);
            let input = state.inputs.get(&pin).copied();
            if let Some(snapshot) = state.pins.get_mut(&pin) {
                snapshot.mode = Some(mode);
                snapshot.level = match mode {
                    PortMode::Output(level) => level,
                    PortMode::Input(pull) => input.unwrap_or(pull_level(pull)),
                };
            }
        }
        debug!("Simulated pin {} claimed as {:?}", pin, mode);
        Ok(Box::new(SimDigital {
            pin,
            mode,
            released: false,
            state: Arc::clone(&self.state),
        }))
    }

    fn open_pwm(&self, pin: u8, frequency: f64) -> Result<Box<dyn PwmChannel>> {
        self.claim(pin)?;
        if let Some(snapshot) = lock(&self.state).pins.get_mut(&pin) {
            snapshot.pwm_frequency = Some(frequency);
        }
        debug!("Simulated pin {} claimed as PWM at {} Hz", pin, frequency);
        Ok(Box::new(SimPwm {
            pin,
            frequency,
            running: false,
            duty: 0.0,
            released: false,
            state: Arc::clone(&self.state),
        }))
    }

    fn sleep(&self, duration: Duration) {
        lock(&self.state).elapsed += duration;
        if self.real_time {
            std::thread::sleep(duration);
        }
    }
}

fn pull_level(pull: Pull) -> Level {
    match pull {
        Pull::Up => Level::High,
        Pull::None | Pull::Down => Level::Low,
    }
}

struct SimDigital {
    pin: u8,
    mode: PortMode,
    released: bool,
    state: Shared,
}

impl DigitalPort for SimDigital {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn mode(&self) -> PortMode {
        self.mode
    }

    fn write(&mut self, level: Level) -> Result<()> {
        if self.released {
            return Err(HardwareError::Released { pin: self.pin });
        }
        if let PortMode::Input(_) = self.mode {
            return Err(HardwareError::WrongMode {
                pin: self.pin,
                mode: self.mode,
            });
        }
        let mut state = lock(&self.state);
        if state.failing.contains(&self.pin) {
            return Err(injected_failure(self.pin));
        }
        if let Some(snapshot) = state.pins.get_mut(&self.pin) {
            if snapshot.level == Level::Low && level == Level::High {
                snapshot.rising_edges += 1;
            }
            snapshot.level = level;
        }
        Ok(())
    }

    fn read(&self) -> Result<Level> {
        if self.released {
            return Err(HardwareError::Released { pin: self.pin });
        }
        let state = lock(&self.state);
        match self.mode {
            PortMode::Output(_) => Ok(state
                .pins
                .get(&self.pin)
                .map_or(Level::Low, |snapshot| snapshot.level)),
            PortMode::Input(pull) => Ok(state
                .inputs
                .get(&self.pin)
                .copied()
                .unwrap_or(pull_level(pull))),
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let mut state = lock(&self.state);
        if state.failing.contains(&self.pin) {
            return Err(injected_failure(self.pin));
        }
        if let Some(snapshot) = state.pins.get_mut(&self.pin) {
            snapshot.claimed = false;
            snapshot.mode = None;
        }
        self.released = true;
        Ok(())
    }
}

struct SimPwm {
    pin: u8,
    frequency: f64,
    running: bool,
    duty: f64,
    released: bool,
    state: Shared,
}

impl SimPwm {
    fn apply(&mut self, running: bool, duty: f64) -> Result<()> {
        let mut state = lock(&self.state);
        if state.failing.contains(&self.pin) {
            return Err(injected_failure(self.pin));
        }
        if let Some(snapshot) = state.pins.get_mut(&self.pin) {
            snapshot.pwm_running = running;
            snapshot.duty = duty;
            if running {
                snapshot.duty_history.push(duty);
            }
        }
        self.running = running;
        self.duty = duty;
        Ok(())
    }
}

impl PwmChannel for SimPwm {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn duty(&self) -> f64 {
        self.duty
    }

    fn start(&mut self, duty: f64) -> Result<()> {
        if self.released {
            return Err(HardwareError::Released { pin: self.pin });
        }
        check_duty(self.pin, duty)?;
        self.apply(true, duty)
    }

    fn set_duty(&mut self, duty: f64) -> Result<()> {
        if self.released {
            return Err(HardwareError::Released { pin: self.pin });
        }
        if !self.running {
            return Err(HardwareError::NotRunning { pin: self.pin });
        }
        check_duty(self.pin, duty)?;
        self.apply(true, duty)
    }

    fn stop(&mut self) -> Result<()> {
        if self.released {
            return Err(HardwareError::Released { pin: self.pin });
        }
        self.apply(false, 0.0)
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.apply(false, 0.0)?;
        if let Some(snapshot) = lock(&self.state).pins.get_mut(&self.pin) {
            snapshot.claimed = false;
            snapshot.pwm_frequency = None;
        }
        self.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_port_counts_rising_edges() {
        let platform = SimulatedPlatform::new();
        let mut port = platform
            .open_digital(11, PortMode::Output(Level::Low))
            .unwrap();

        for _ in 0..3 {
            port.set_high().unwrap();
            port.set_low().unwrap();
        }

        let snapshot = platform.pin(11).unwrap();
        assert_eq!(snapshot.rising_edges, 3);
        assert_eq!(snapshot.level, Level::Low);
        assert_eq!(port.read().unwrap(), Level::Low);
    }

    #[test]
    fn test_input_port_reads_pull_and_rejects_writes() {
        let platform = SimulatedPlatform::new();
        let mut port = platform.open_digital(31, PortMode::Input(Pull::Up)).unwrap();
        assert_eq!(port.read().unwrap(), Level::High);

        platform.set_input(31, Level::Low);
        assert_eq!(port.read().unwrap(), Level::Low);

        assert!(matches!(
            port.set_high(),
            Err(HardwareError::WrongMode { pin: 31, .. })
        ));
    }

    #[test]
    fn test_pin_cannot_be_claimed_twice() {
        let platform = SimulatedPlatform::new();
        let mut first = platform
            .open_digital(16, PortMode::Output(Level::Low))
            .unwrap();
        assert!(matches!(
            platform.open_pwm(16, 50.0),
            Err(HardwareError::PinBusy { pin: 16 })
        ));

        first.release().unwrap();
        first.release().unwrap();
        assert!(platform.open_pwm(16, 50.0).is_ok());
    }

    #[test]
    fn test_unknown_pin_rejected() {
        let platform = SimulatedPlatform::new();
        assert!(matches!(
            platform.open_digital(2, PortMode::Output(Level::Low)),
            Err(HardwareError::UnknownPin { pin: 2 })
        ));
    }

    #[test]
    fn test_pwm_duty_requires_running_channel() {
        let platform = SimulatedPlatform::new();
        let mut pwm = platform.open_pwm(32, 200.0).unwrap();

        assert!(matches!(
            pwm.set_duty(10.0),
            Err(HardwareError::NotRunning { pin: 32 })
        ));

        pwm.start(10.0).unwrap();
        pwm.set_duty(50.0).unwrap();
        assert!(matches!(
            pwm.set_duty(120.0),
            Err(HardwareError::DutyOutOfRange { pin: 32, .. })
        ));

        pwm.stop().unwrap();
        let snapshot = platform.pin(32).unwrap();
        assert_eq!(snapshot.duty_history, vec![10.0, 50.0]);
        assert!(snapshot.is_zeroed());
    }

    #[test]
    fn test_released_lines_reject_io() {
        let platform = SimulatedPlatform::new();
        let mut pwm = platform.open_pwm(33, 50.0).unwrap();
        pwm.start(40.0).unwrap();
        pwm.release().unwrap();

        assert!(matches!(pwm.start(1.0), Err(HardwareError::Released { pin: 33 })));
        let snapshot = platform.pin(33).unwrap();
        assert!(!snapshot.claimed);
        assert!(snapshot.is_zeroed());
    }

    #[test]
    fn test_failing_pin_keeps_claim() {
        let platform = SimulatedPlatform::new();
        let mut port = platform
            .open_digital(36, PortMode::Output(Level::Low))
            .unwrap();
        platform.fail_pin(36);

        assert!(port.set_high().is_err());
        assert!(port.release().is_err());
        assert!(platform.pin(36).unwrap().claimed);

        platform.heal_pin(36);
        port.release().unwrap();
        assert!(!platform.pin(36).unwrap().claimed);
    }

    #[test]
    fn test_virtual_clock_accumulates() {
        let platform = SimulatedPlatform::new();
        platform.sleep(Duration::from_millis(250));
        platform.sleep(Duration::from_millis(750));
        assert_eq!(platform.elapsed(), Duration::from_secs(1));
    }
}
