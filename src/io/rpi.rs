// Raspberry Pi GPIO through rppal
//
// Board pins are translated to BCM lines. PWM uses rppal's software PWM,
// which works on any line (like RPi.GPIO's PWM objects).

use std::time::Duration;

use rppal::gpio::{self, Gpio, InputPin, OutputPin};
use tracing::{debug, info};

use super::{
    board_to_bcm, check_duty, DigitalPort, HardwareError, Level, PlatformIo, PortMode, Pull,
    PwmChannel, Result,
};

impl From<Level> for gpio::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => gpio::Level::Low,
            Level::High => gpio::Level::High,
        }
    }
}

impl From<gpio::Level> for Level {
    fn from(level: gpio::Level) -> Self {
        match level {
            gpio::Level::Low => Level::Low,
            gpio::Level::High => Level::High,
        }
    }
}

/// GPIO platform backed by /dev/gpiomem
pub struct RpiPlatform {
    gpio: Gpio,
}

impl RpiPlatform {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new()?;
        info!("Opened Raspberry Pi GPIO");
        Ok(Self { gpio })
    }

    fn line(&self, pin: u8) -> Result<gpio::Pin> {
        let bcm = board_to_bcm(pin).ok_or(HardwareError::UnknownPin { pin })?;
        Ok(self.gpio.get(bcm)?)
    }
}

impl PlatformIo for RpiPlatform {
    fn name(&self) -> &str {
        "raspberry-pi"
    }

    fn open_digital(&self, pin: u8, mode: PortMode) -> Result<Box<dyn DigitalPort>> {
        let line = self.line(pin)?;
        let line = match mode {
            PortMode::Output(Level::Low) => RpiLine::Output(line.into_output_low()),
            PortMode::Output(Level::High) => RpiLine::Output(line.into_output_high()),
            PortMode::Input(Pull::None) => RpiLine::Input(line.into_input()),
            PortMode::Input(Pull::Up) => RpiLine::Input(line.into_input_pullup()),
            PortMode::Input(Pull::Down) => RpiLine::Input(line.into_input_pulldown()),
        };
        debug!("Pin {} claimed as {:?}", pin, mode);
        Ok(Box::new(RpiPort {
            pin,
            mode,
            line: Some(line),
        }))
    }

    fn open_pwm(&self, pin: u8, frequency: f64) -> Result<Box<dyn PwmChannel>> {
        let out = self.line(pin)?.into_output_low();
        debug!("Pin {} claimed as PWM at {} Hz", pin, frequency);
        Ok(Box::new(RpiPwm {
            pin,
            frequency,
            duty: 0.0,
            running: false,
            out: Some(out),
        }))
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

enum RpiLine {
    Input(InputPin),
    Output(OutputPin),
}

struct RpiPort {
    pin: u8,
    mode: PortMode,
    // None once released; dropping the rppal pin restores its original mode
    line: Option<RpiLine>,
}

impl DigitalPort for RpiPort {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn mode(&self) -> PortMode {
        self.mode
    }

    fn write(&mut self, level: Level) -> Result<()> {
        match self.line.as_mut() {
            Some(RpiLine::Output(out)) => {
                out.write(level.into());
                Ok(())
            }
            Some(RpiLine::Input(_)) => Err(HardwareError::WrongMode {
                pin: self.pin,
                mode: self.mode,
            }),
            None => Err(HardwareError::Released { pin: self.pin }),
        }
    }

    fn read(&self) -> Result<Level> {
        match self.line.as_ref() {
            Some(RpiLine::Output(out)) => Ok(if out.is_set_high() {
                Level::High
            } else {
                Level::Low
            }),
            Some(RpiLine::Input(input)) => Ok(input.read().into()),
            None => Err(HardwareError::Released { pin: self.pin }),
        }
    }

    fn release(&mut self) -> Result<()> {
        if let Some(RpiLine::Output(out)) = self.line.as_mut() {
            out.set_low();
        }
        self.line = None;
        Ok(())
    }
}

struct RpiPwm {
    pin: u8,
    frequency: f64,
    duty: f64,
    running: bool,
    out: Option<OutputPin>,
}

impl RpiPwm {
    fn out(&mut self) -> Result<&mut OutputPin> {
        self.out
            .as_mut()
            .ok_or(HardwareError::Released { pin: self.pin })
    }
}

impl PwmChannel for RpiPwm {
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
        check_duty(self.pin, duty)?;
        let frequency = self.frequency;
        // rppal takes the duty cycle as a 0.0-1.0 fraction
        self.out()?.set_pwm_frequency(frequency, duty / 100.0)?;
        self.running = true;
        self.duty = duty;
        Ok(())
    }

    fn set_duty(&mut self, duty: f64) -> Result<()> {
        if self.out.is_some() && !self.running {
            return Err(HardwareError::NotRunning { pin: self.pin });
        }
        self.start(duty)
    }

    fn stop(&mut self) -> Result<()> {
        let out = self.out()?;
        out.clear_pwm()?;
        out.set_low();
        self.running = false;
        self.duty = 0.0;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.out.is_none() {
            return Ok(());
        }
        self.stop()?;
        self.out = None;
        Ok(())
    }
}
