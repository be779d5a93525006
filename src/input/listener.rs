//! Button polling loops
//!
//! The dispatcher turns trigger taps into state machine actions and runs
//! them inline: while an action runs the trigger is not polled, so presses
//! made during a scan or a tag wait are dropped rather than queued. The
//! mode selector polls the mode button independently.

use std::sync::Arc;

use embedded_hal::digital::InputPin;
use tracing::{debug, info};

use super::tap::{PressDetector, TapDetector};
use super::InputError;
use crate::display::TextDisplay;
use crate::nfc::NfcStore;
use crate::state::StateMachine;
use crate::vision::Scanner;

/// Trigger button loop
pub struct Dispatcher<P, S, N, D> {
    detector: TapDetector<P>,
    machine: Arc<StateMachine<S, N, D>>,
}

impl<P, S, N, D> Dispatcher<P, S, N, D>
where
    P: InputPin,
    S: Scanner,
    N: NfcStore,
    D: TextDisplay,
{
    pub fn new(detector: TapDetector<P>, machine: Arc<StateMachine<S, N, D>>) -> Self {
        Self { detector, machine }
    }

    /// Run until the trigger input fails
    pub async fn run(mut self) -> Result<(), InputError> {
        info!("trigger dispatcher started");

        loop {
            let tap = self.detector.next_tap().await?;
            debug!(?tap, "trigger tap");
            self.machine.handle_tap(tap).await;
        }
    }
}

/// Mode button loop
pub struct ModeSelector<P, S, N, D> {
    detector: PressDetector<P>,
    machine: Arc<StateMachine<S, N, D>>,
}

impl<P, S, N, D> ModeSelector<P, S, N, D>
where
    P: InputPin,
    S: Scanner,
    N: NfcStore,
    D: TextDisplay,
{
    pub fn new(detector: PressDetector<P>, machine: Arc<StateMachine<S, N, D>>) -> Self {
        Self { detector, machine }
    }

    /// Run until the mode input fails
    pub async fn run(mut self) -> Result<(), InputError> {
        info!("mode selector started");

        loop {
            self.detector.next_press().await?;
            self.machine.cycle_mode();
            self.detector.settle().await;
        }
    }
}
