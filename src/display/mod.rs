//! Two-line status display
//!
//! The controller talks to a [`TextDisplay`]; on the device that is an
//! HD44780 16x2 LCD shared between the dispatcher and the mode selector.

mod hd44780;

use std::sync::Mutex;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use tracing::warn;

pub use hd44780::{DisplayError, Hd44780, LcdPins, LINE_1, LINE_2, WIDTH};

/// A two-line text display
///
/// Implementations serialize concurrent callers themselves; both polling
/// loops write to the same device.
pub trait TextDisplay: Send + Sync {
    fn clear(&self);

    fn write_lines(&self, line1: &str, line2: &str);

    /// Clear, then write both lines
    fn show(&self, line1: &str, line2: &str) {
        self.clear();
        self.write_lines(line1, line2);
    }
}

/// Pad or truncate `text` to exactly [`WIDTH`] columns
///
/// The A00 character ROM maps `\` to ¥ and `~` to an arrow, so those become
/// `?` along with everything outside printable ASCII.
pub fn fit_line(text: &str) -> String {
    text.chars()
        .map(|c| if rom_matches_ascii(c) { c } else { '?' })
        .chain(std::iter::repeat(' '))
        .take(WIDTH)
        .collect()
}

fn rom_matches_ascii(c: char) -> bool {
    (c == ' ' || c.is_ascii_graphic()) && !matches!(c, '\\' | '~')
}

/// Characters `from..from + WIDTH` of `text`, for paging long text over lines
pub fn slice_line(text: &str, from: usize) -> String {
    text.chars().skip(from).take(WIDTH).collect()
}

/// HD44780 behind the single display lock
pub struct LcdDisplay<P, D> {
    lcd: Mutex<Hd44780<P, D>>,
}

impl<P, D> LcdDisplay<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    /// Initialize the controller and wrap it for shared use
    pub fn new(mut lcd: Hd44780<P, D>) -> Result<Self, DisplayError> {
        lcd.init()?;
        Ok(Self {
            lcd: Mutex::new(lcd),
        })
    }

    fn with_lcd(&self, op: impl FnOnce(&mut Hd44780<P, D>) -> Result<(), DisplayError>) {
        let mut lcd = match self.lcd.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = op(&mut lcd) {
            warn!(?e, "display update failed");
        }
    }
}

impl<P, D> TextDisplay for LcdDisplay<P, D>
where
    P: OutputPin + Send,
    D: DelayNs + Send,
{
    fn clear(&self) {
        self.with_lcd(|lcd| lcd.clear());
    }

    fn write_lines(&self, line1: &str, line2: &str) {
        self.with_lcd(|lcd| {
            lcd.write_line(LINE_1, line1)?;
            lcd.write_line(LINE_2, line2)
        });
    }
}
