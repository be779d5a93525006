//! Core state machine implementation
//!
//! The controller owns the application state, the scan mode and the
//! collaborators (scanner, tag store, display). The dispatcher, the mode
//! selector and the keyboard fallback all drive it through `&self`.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::display::{slice_line, TextDisplay, WIDTH};
use crate::events::StateEvent;
use crate::input::TapKind;
use crate::nfc::NfcStore;
use crate::state::Mode;
use crate::vision::Scanner;

/// Second display line while a result waits for confirmation
pub const CONFIRM_PROMPT: &str = "1x:Write 2x:Drop";

/// How long transient status screens stay up
const SHOW_READ_BANNER: Duration = Duration::from_millis(1000);
const SHOW_TAG_TEXT: Duration = Duration::from_millis(4000);
const SHOW_READ_FAILED: Duration = Duration::from_millis(2000);
const SHOW_WRITE_RESULT: Duration = Duration::from_millis(1500);
const SHOW_CANCELLED: Duration = Duration::from_millis(1500);
const SHOW_SCAN_FAILED: Duration = Duration::from_millis(2000);
const SHOW_GOODBYE: Duration = Duration::from_millis(1000);

/// Application state
///
/// The scan result waiting for confirmation lives inside `Confirming`, so
/// leaving that state always ends the result's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum State {
    /// Waiting for a tap
    #[default]
    Idle,
    /// A scan result is waiting to be written or dropped
    Confirming { pending: String },
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Confirming { .. } => write!(f, "Confirming"),
        }
    }
}

/// What a tap resolves to in the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Scan,
    ReadTag,
    WriteTag(String),
    Drop,
}

impl State {
    /// Apply a tap, returning the action to run
    ///
    /// Taps in `Confirming` move the pending result out and leave `Idle`
    /// behind; taps in `Idle` do not change the state.
    pub fn apply(&mut self, tap: TapKind) -> Action {
        match (std::mem::take(self), tap) {
            (State::Idle, TapKind::Single) => Action::Scan,
            (State::Idle, TapKind::Double) => Action::ReadTag,
            (State::Confirming { pending }, TapKind::Single) => Action::WriteTag(pending),
            (State::Confirming { .. }, TapKind::Double) => Action::Drop,
        }
    }

    /// The pending result, if any
    pub fn pending(&self) -> Option<&str> {
        match self {
            State::Idle => None,
            State::Confirming { pending } => Some(pending),
        }
    }
}

/// Result of a scan request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Result is pending confirmation
    Confirming,
    /// Camera or model failed; back to idle
    Failed,
    /// Another scan was already running
    Rejected,
}

/// The controller that owns state and runs actions
pub struct StateMachine<S, N, D> {
    scanner: S,
    nfc: N,
    display: D,
    /// Current state, including the pending result
    state: Mutex<State>,
    /// Current scan mode
    mode: Mutex<Mode>,
    /// Held for the duration of a scan; taken with `try_lock`
    scan_guard: tokio::sync::Mutex<()>,
    /// Channel for emitting state events
    event_tx: broadcast::Sender<StateEvent>,
}

impl<S, N, D> StateMachine<S, N, D>
where
    S: Scanner,
    N: NfcStore,
    D: TextDisplay,
{
    /// Create a new state machine in Idle with the first mode selected
    pub fn new(scanner: S, nfc: N, display: D, event_tx: broadcast::Sender<StateEvent>) -> Self {
        Self {
            scanner,
            nfc,
            display,
            state: Mutex::new(State::Idle),
            mode: Mutex::new(Mode::default()),
            scan_guard: tokio::sync::Mutex::new(()),
            event_tx,
        }
    }

    /// Get a snapshot of the current state
    pub fn state(&self) -> State {
        self.lock_state().clone()
    }

    /// Get the current mode
    pub fn mode(&self) -> Mode {
        *lock(&self.mode)
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn nfc(&self) -> &N {
        &self.nfc
    }

    /// Resolve a tap against the current state and run the action
    pub async fn handle_tap(&self, tap: TapKind) {
        let (from, action) = {
            let mut state = self.lock_state();
            let from = state.to_string();
            (from, state.apply(tap))
        };
        info!(%from, ?tap, ?action, "tap resolved");

        match action {
            Action::Scan => {
                self.perform_scan().await;
            }
            Action::ReadTag => self.read_tag().await,
            Action::WriteTag(text) => self.write_tag(text).await,
            Action::Drop => self.drop_result().await,
        }
    }

    /// Capture and analyze a frame; on success wait for confirmation
    ///
    /// A request while another scan is running is rejected without effect.
    pub async fn perform_scan(&self) -> ScanOutcome {
        let Ok(_guard) = self.scan_guard.try_lock() else {
            info!("scan already running, request ignored");
            self.emit(StateEvent::ScanRejected);
            return ScanOutcome::Rejected;
        };

        let mode = self.mode();
        info!(%mode, "starting scan");
        self.emit(StateEvent::ScanStarted { mode });
        self.display.show("Thinking...", mode.label());

        let started = Instant::now();
        match self.scanner.scan(mode).await {
            Ok(text) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(%text, duration_ms, "scan result");

                self.display
                    .show(&slice_line(&text, 0), CONFIRM_PROMPT);
                *self.lock_state() = State::Confirming {
                    pending: text.clone(),
                };
                self.emit(StateEvent::ScanCompleted {
                    mode,
                    text,
                    duration_ms,
                });
                ScanOutcome::Confirming
            }
            Err(e) => {
                error!(%e, "scan failed");
                self.emit(StateEvent::ScanFailed {
                    reason: e.to_string(),
                });
                self.display.show("Error / Failed", "");
                tokio::time::sleep(SHOW_SCAN_FAILED).await;
                self.reset_to_ready();
                ScanOutcome::Failed
            }
        }
    }

    /// Wait for a tag and show its contents over both lines
    pub async fn read_tag(&self) {
        info!("reading tag");
        self.display.show("Hold Tag Near", "Reader...");

        match self.nfc.read().await {
            Ok(tag) => {
                info!(id = tag.id, text = %tag.text, "tag read");
                self.display.show("Read Success!", "Showing Data...");
                tokio::time::sleep(SHOW_READ_BANNER).await;

                self.display
                    .show(&slice_line(&tag.text, 0), &slice_line(&tag.text, WIDTH));
                self.emit(StateEvent::TagRead {
                    id: tag.id,
                    text: tag.text,
                });
                tokio::time::sleep(SHOW_TAG_TEXT).await;
            }
            Err(e) => {
                error!(%e, "tag read failed");
                self.emit(StateEvent::TagReadFailed {
                    reason: e.to_string(),
                });
                self.display.show("Read Failed", "");
                tokio::time::sleep(SHOW_READ_FAILED).await;
            }
        }

        self.reset_to_ready();
    }

    /// Store a confirmed result on a tag
    async fn write_tag(&self, text: String) {
        info!(%text, "writing result to tag");
        self.display.show("Hold Tag Near", "Reader...");

        match self.nfc.write(text.clone()).await {
            Ok(()) => {
                info!("tag write succeeded");
                self.emit(StateEvent::TagWritten { text });
                self.display.show("Write Success!", "");
            }
            Err(e) => {
                error!(%e, "tag write failed");
                self.emit(StateEvent::TagWriteFailed {
                    reason: e.to_string(),
                });
                self.display.show("Write Failed.", "");
            }
        }

        tokio::time::sleep(SHOW_WRITE_RESULT).await;
        self.reset_to_ready();
    }

    async fn drop_result(&self) {
        info!("result dropped");
        self.emit(StateEvent::ResultDropped);
        self.display.show("Cancelled.", "");
        tokio::time::sleep(SHOW_CANCELLED).await;
        self.reset_to_ready();
    }

    /// Advance to the next mode, abandoning any pending result
    pub fn cycle_mode(&self) -> Mode {
        let mode = {
            let mut mode = lock(&self.mode);
            *mode = mode.next();
            *mode
        };
        let previous = std::mem::take(&mut *self.lock_state());
        if previous.pending().is_some() {
            debug!("pending result abandoned by mode change");
        }

        info!(%mode, "mode changed");
        self.display.show("Mode Changed:", mode.label());
        self.emit(StateEvent::ModeChanged { mode });
        mode
    }

    /// Return to Idle and show the ready screen
    pub fn reset_to_ready(&self) {
        *self.lock_state() = State::Idle;
        self.display.show("Ready to Scan:", self.mode().label());
    }

    /// Show the farewell screen before shutdown
    pub async fn say_goodbye(&self) {
        self.display.show("Goodbye!", "");
        tokio::time::sleep(SHOW_GOODBYE).await;
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting event");
        if self.event_tx.send(event).is_err() {
            // No subscribers; nothing listens when speech is disabled
            debug!("no event subscribers");
        }
    }
}

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("state lock poisoned, recovering");
        poisoned.into_inner()
    })
}
