//! Tap classification on an active-low button
//!
//! A press is a falling edge. After the release, a second press inside the
//! double-tap window makes it a double tap; otherwise it is a single tap.

use std::time::Duration;

use embedded_hal::digital::{Error as _, InputPin};
use serde::Deserialize;
use tokio::time::{sleep, Instant};

use super::InputError;

/// A classified button interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapKind {
    Single,
    Double,
}

/// Polling intervals and the double-tap window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TapTiming {
    /// Interval between edge checks while idle
    #[serde(with = "millis")]
    pub poll: Duration,
    /// Interval between checks while a tap is being classified
    #[serde(with = "millis")]
    pub settle: Duration,
    /// Time after the first release in which a second press counts
    #[serde(with = "millis")]
    pub double_tap_window: Duration,
}

impl Default for TapTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(50),
            settle: Duration::from_millis(10),
            double_tap_window: Duration::from_millis(400),
        }
    }
}

/// Detects taps on a pulled-up, active-low input
pub struct TapDetector<P> {
    pin: P,
    timing: TapTiming,
    /// Level seen on the previous idle poll
    was_high: bool,
}

impl<P: InputPin> TapDetector<P> {
    pub fn new(pin: P, timing: TapTiming) -> Self {
        Self {
            pin,
            timing,
            was_high: true,
        }
    }

    /// Wait for the next tap and classify it
    ///
    /// Returns once the button is released again, so the caller never acts
    /// in the middle of a press.
    pub async fn next_tap(&mut self) -> Result<TapKind, InputError> {
        self.wait_for_press().await?;
        self.wait_for_release().await?;

        let released_at = Instant::now();
        let mut kind = TapKind::Single;
        while released_at.elapsed() < self.timing.double_tap_window {
            if self.is_pressed()? {
                kind = TapKind::Double;
                break;
            }
            sleep(self.timing.settle).await;
        }

        if kind == TapKind::Double {
            self.wait_for_release().await?;
        }

        // A button still held after the action must be released before it
        // can start another tap
        self.was_high = false;
        Ok(kind)
    }

    async fn wait_for_press(&mut self) -> Result<(), InputError> {
        loop {
            let high = !self.is_pressed()?;
            if self.was_high && !high {
                self.was_high = false;
                return Ok(());
            }
            self.was_high = high;
            sleep(self.timing.poll).await;
        }
    }

    async fn wait_for_release(&mut self) -> Result<(), InputError> {
        while self.is_pressed()? {
            sleep(self.timing.settle).await;
        }
        Ok(())
    }

    fn is_pressed(&mut self) -> Result<bool, InputError> {
        self.pin.is_low().map_err(|e| InputError::Read(e.kind()))
    }
}

/// Watches a second button for presses, with a settle delay after each
pub struct PressDetector<P> {
    pin: P,
    poll: Duration,
    settle: Duration,
    was_high: bool,
}

impl<P: InputPin> PressDetector<P> {
    pub fn new(pin: P, poll: Duration, settle: Duration) -> Self {
        Self {
            pin,
            poll,
            settle,
            was_high: true,
        }
    }

    /// Wait for the next falling edge
    pub async fn next_press(&mut self) -> Result<(), InputError> {
        loop {
            let high = self.pin.is_high().map_err(|e| InputError::Read(e.kind()))?;
            let edge = self.was_high && !high;
            self.was_high = high;
            if edge {
                return Ok(());
            }
            sleep(self.poll).await;
        }
    }

    /// Ignore the input for the settle period after a press
    pub async fn settle(&mut self) {
        sleep(self.settle).await;
    }
}

/// Read durations from config files as integer milliseconds
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
