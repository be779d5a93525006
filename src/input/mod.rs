//! Input module for the trigger and mode buttons
//!
//! Both buttons are pulled up and read active-low. The trigger distinguishes
//! single and double taps; the mode button only counts presses. The keyboard
//! fallback drives the same actions from stdin.

pub mod keyboard;
mod listener;
mod tap;

use embedded_hal::digital::ErrorKind;

pub use listener::{Dispatcher, ModeSelector};
pub use tap::{PressDetector, TapDetector, TapKind, TapTiming};

pub(crate) use tap::millis;

/// Errors that stop a polling loop
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("failed to read input line: {0:?}")]
    Read(ErrorKind),
}
