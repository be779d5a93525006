//! HD44780 character LCD driven in 4-bit mode
//!
//! Six GPIO outputs: RS selects command/data, E latches a nibble on its
//! falling edge, D4-D7 carry the nibble. The R/W line is tied to ground so
//! the busy flag is never read; fixed delays cover command execution.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, ErrorKind, OutputPin};

/// Visible columns per line
pub const WIDTH: usize = 16;

/// DDRAM address commands for the start of each line
pub const LINE_1: u8 = 0x80;
pub const LINE_2: u8 = 0xC0;

const CMD_CLEAR: u8 = 0x01;
const CMD_FUNCTION_4BIT_2LINE: u8 = 0x28;
const CMD_DISPLAY_ON: u8 = 0x0C;
const CMD_ENTRY_INCREMENT: u8 = 0x06;

/// Enable pulse and settle times
const E_PULSE_US: u32 = 1;
const E_SETTLE_US: u32 = 50;
const CLEAR_MS: u32 = 2;

/// Errors from the LCD output lines
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("LCD output line write failed: {0:?}")]
    Pin(ErrorKind),
}

/// The six output lines an HD44780 needs in 4-bit mode
pub struct LcdPins<P> {
    pub rs: P,
    pub e: P,
    /// D4, D5, D6, D7
    pub data: [P; 4],
}

/// 4-bit HD44780 driver
pub struct Hd44780<P, D> {
    pins: LcdPins<P>,
    delay: D,
}

impl<P, D> Hd44780<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    pub fn new(pins: LcdPins<P>, delay: D) -> Self {
        Self { pins, delay }
    }

    /// Run the power-on sequence that forces 4-bit mode
    pub fn init(&mut self) -> Result<(), DisplayError> {
        self.delay.delay_ms(50);
        self.send_nibble(0x03)?;
        self.delay.delay_ms(5);
        self.send_nibble(0x03)?;
        self.delay.delay_ms(1);
        self.send_nibble(0x03)?;
        self.delay.delay_ms(1);
        self.send_nibble(0x02)?;

        self.command(CMD_FUNCTION_4BIT_2LINE)?;
        self.command(CMD_DISPLAY_ON)?;
        self.command(CMD_ENTRY_INCREMENT)?;
        self.clear()
    }

    pub fn clear(&mut self) -> Result<(), DisplayError> {
        self.command(CMD_CLEAR)?;
        self.delay.delay_ms(CLEAR_MS);
        Ok(())
    }

    /// Write a full line starting at `addr` ([`LINE_1`] or [`LINE_2`])
    pub fn write_line(&mut self, addr: u8, text: &str) -> Result<(), DisplayError> {
        self.command(addr)?;
        for byte in super::fit_line(text).bytes() {
            self.write_byte(byte, true)?;
        }
        Ok(())
    }

    fn command(&mut self, cmd: u8) -> Result<(), DisplayError> {
        self.write_byte(cmd, false)
    }

    fn write_byte(&mut self, value: u8, is_data: bool) -> Result<(), DisplayError> {
        set(&mut self.pins.rs, is_data)?;
        self.send_nibble(value >> 4)?;
        self.send_nibble(value & 0x0F)
    }

    fn send_nibble(&mut self, nibble: u8) -> Result<(), DisplayError> {
        for (bit, pin) in self.pins.data.iter_mut().enumerate() {
            set(pin, nibble & (1 << bit) != 0)?;
        }
        self.pulse_enable()
    }

    fn pulse_enable(&mut self) -> Result<(), DisplayError> {
        self.delay.delay_us(E_SETTLE_US);
        set(&mut self.pins.e, true)?;
        self.delay.delay_us(E_PULSE_US);
        set(&mut self.pins.e, false)?;
        self.delay.delay_us(E_SETTLE_US);
        Ok(())
    }
}

fn set<P: OutputPin>(pin: &mut P, high: bool) -> Result<(), DisplayError> {
    let result = if high { pin.set_high() } else { pin.set_low() };
    result.map_err(|e| DisplayError::Pin(e.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NoDelay, RecordingBus};

    fn lcd(bus: &RecordingBus) -> Hd44780<crate::testing::BusPin, NoDelay> {
        Hd44780::new(bus.pins(), NoDelay)
    }

    #[test]
    fn test_data_byte_sends_high_nibble_first() {
        let bus = RecordingBus::new();
        let mut lcd = lcd(&bus);

        lcd.write_byte(b'A', true).unwrap();

        assert_eq!(bus.latched(), vec![(true, 0x4), (true, 0x1)]);
    }

    #[test]
    fn test_command_clears_rs() {
        let bus = RecordingBus::new();
        let mut lcd = lcd(&bus);

        lcd.clear().unwrap();

        assert_eq!(bus.latched(), vec![(false, 0x0), (false, 0x1)]);
    }

    #[test]
    fn test_init_sequence() {
        let bus = RecordingBus::new();
        let mut lcd = lcd(&bus);

        lcd.init().unwrap();

        let latched = bus.latched();
        let nibbles: Vec<u8> = latched.iter().map(|(_, n)| *n).collect();
        assert_eq!(&nibbles[..4], &[0x3, 0x3, 0x3, 0x2]);
        assert_eq!(
            &nibbles[4..],
            &[0x2, 0x8, 0x0, 0xC, 0x0, 0x6, 0x0, 0x1]
        );
        assert!(latched.iter().all(|(rs, _)| !rs));
    }

    #[test]
    fn test_write_line_pads_to_width() {
        let bus = RecordingBus::new();
        let mut lcd = lcd(&bus);

        lcd.write_line(LINE_2, "Hi").unwrap();

        let latched = bus.latched();
        // address command + 16 characters, two nibbles each
        assert_eq!(latched.len(), 2 * (1 + WIDTH));
        assert_eq!(&latched[..2], &[(false, 0xC), (false, 0x0)]);
        assert_eq!(&latched[2..4], &[(true, 0x4), (true, 0x8)]);
        // trailing padding is spaces (0x20)
        assert_eq!(&latched[latched.len() - 2..], &[(true, 0x2), (true, 0x0)]);
    }
}
