//! E220-900T22 UART radio transport + mode/status GPIO pins.
//!
//! Grounded on `original_source/libLORA.py`'s `setupGPIO`/`setMode`/
//! `WaitAUX`/`Led_flash`: two mode pins (`M0`, `M1`) select the module's
//! operating mode, one input pin (`AUX`) signals "ready", and two LEDs give
//! a status flash on beacon/ACK/receive events. GPIO access is `rppal`
//! rather than `RPi.GPIO`/`Mock.GPIO` since this is a native Rust Pi target.

use crate::error::SastResult;
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

pub const LED_G: u8 = 19;
pub const LED_R: u8 = 13;
pub const AUX_PIN: u8 = 25;
pub const M0_PIN: u8 = 5;
pub const M1_PIN: u8 = 6;

pub const DEFAULT_PORT: &str = "/dev/ttyS0";
pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Red,
    Green,
}

/// Radio mode: 0 normal, 1/2 config variants, 3 deep sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal = 0,
    ConfigA = 1,
    ConfigB = 2,
    Sleep = 3,
}

pub struct Radio {
    port: Box<dyn SerialPort>,
    m0: OutputPin,
    m1: OutputPin,
    aux: InputPin,
    led_g: OutputPin,
    led_r: OutputPin,
}

impl Radio {
    pub fn open(port_path: &str, baud: u32) -> SastResult<Self> {
        let port = serialport::new(port_path, baud)
            .timeout(Duration::from_millis(500))
            .open()?;
        let gpio = Gpio::new().map_err(|e| crate::error::SastError::Fatal(format!("gpio init: {e}")))?;
        let m0 = gpio
            .get(M0_PIN)
            .map_err(|e| crate::error::SastError::Fatal(format!("M0 pin: {e}")))?
            .into_output();
        let m1 = gpio
            .get(M1_PIN)
            .map_err(|e| crate::error::SastError::Fatal(format!("M1 pin: {e}")))?
            .into_output();
        let aux = gpio
            .get(AUX_PIN)
            .map_err(|e| crate::error::SastError::Fatal(format!("AUX pin: {e}")))?
            .into_input();
        let led_g = gpio
            .get(LED_G)
            .map_err(|e| crate::error::SastError::Fatal(format!("LED_G pin: {e}")))?
            .into_output();
        let led_r = gpio
            .get(LED_R)
            .map_err(|e| crate::error::SastError::Fatal(format!("LED_R pin: {e}")))?
            .into_output();
        Ok(Radio { port, m0, m1, aux, led_g, led_r })
    }

    pub fn set_mode(&mut self, mode: Mode) {
        let (m0, m1) = match mode {
            Mode::Normal => (false, false),
            Mode::ConfigA => (true, false),
            Mode::ConfigB => (false, true),
            Mode::Sleep => (true, true),
        };
        self.m0.write(if m0 { Level::High } else { Level::Low });
        self.m1.write(if m1 { Level::High } else { Level::Low });
    }

    /// Polls `AUX` at 200ms until high (module ready to transmit).
    pub fn wait_ready(&self) {
        while self.aux.read() == Level::Low {
            thread::sleep(Duration::from_millis(200));
        }
    }

    pub fn send(&mut self, bytes: &[u8]) -> SastResult<()> {
        self.wait_ready();
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    pub fn recv_exact(&mut self, n: usize) -> SastResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => thread::sleep(Duration::from_millis(100)),
                Ok(k) => filled += k,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => thread::sleep(Duration::from_millis(100)),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    pub fn recv_available(&mut self) -> SastResult<Vec<u8>> {
        let waiting = self.port.bytes_to_read().unwrap_or(0) as usize;
        if waiting == 0 {
            thread::sleep(Duration::from_millis(500));
        }
        let waiting = self.port.bytes_to_read().unwrap_or(0) as usize;
        if waiting == 0 {
            return Ok(Vec::new());
        }
        self.recv_exact(waiting)
    }

    /// Flashes a status LED `times` times on a detached thread, matching
    /// `Led_flash`'s fire-and-forget behaviour — callers never block on it.
    pub fn flash(&self, color: LedColor, times: u32) {
        let pin_num = match color {
            LedColor::Red => LED_R,
            LedColor::Green => LED_G,
        };
        thread::spawn(move || {
            let Ok(gpio) = Gpio::new() else { return };
            let Ok(pin) = gpio.get(pin_num) else { return };
            let mut pin = pin.into_output();
            for _ in 0..times {
                pin.write(Level::High);
                thread::sleep(Duration::from_millis(100));
                pin.write(Level::Low);
                thread::sleep(Duration::from_millis(100));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_pin_levels_match_datasheet_table() {
        // Normal=00, ConfigA=10, ConfigB=01, Sleep=11 per setMode()'s mapping.
        let cases = [
            (Mode::Normal, (false, false)),
            (Mode::ConfigA, (true, false)),
            (Mode::ConfigB, (false, true)),
            (Mode::Sleep, (true, true)),
        ];
        for (mode, expected) in cases {
            let (m0, m1) = match mode {
                Mode::Normal => (false, false),
                Mode::ConfigA => (true, false),
                Mode::ConfigB => (false, true),
                Mode::Sleep => (true, true),
            };
            assert_eq!((m0, m1), expected);
        }
    }
}
