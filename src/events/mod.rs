//! Events module for state machine transitions
//!
//! Every action the controller takes is published as a structured event.
//! The speech task speaks results from them and `main` logs them.

use serde::{Deserialize, Serialize};

use crate::state::Mode;

/// Events emitted by the controller during transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Mode button advanced the scan mode
    ModeChanged { mode: Mode },

    /// Camera scan started
    ScanStarted { mode: Mode },

    /// Scan produced a result, now waiting for write/drop
    ScanCompleted {
        mode: Mode,
        text: String,
        /// Capture plus remote analysis time
        duration_ms: u64,
    },

    /// Scan failed (camera or remote call)
    ScanFailed { reason: String },

    /// A scan was requested while another was running
    ScanRejected,

    /// Tag read and shown on the display
    TagRead { id: u64, text: String },

    /// Tag read failed
    TagReadFailed { reason: String },

    /// Pending result stored on a tag
    TagWritten { text: String },

    /// Writing the pending result failed
    TagWriteFailed { reason: String },

    /// Pending result discarded with a double tap
    ResultDropped,
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::ModeChanged { mode } => write!(f, "MODE_CHANGED ({})", mode),
            StateEvent::ScanStarted { mode } => write!(f, "SCAN_STARTED ({})", mode),
            StateEvent::ScanCompleted { duration_ms, .. } => {
                write!(f, "SCAN_COMPLETED ({}ms)", duration_ms)
            }
            StateEvent::ScanFailed { reason } => write!(f, "SCAN_FAILED ({})", reason),
            StateEvent::ScanRejected => write!(f, "SCAN_REJECTED"),
            StateEvent::TagRead { id, .. } => write!(f, "TAG_READ ({})", id),
            StateEvent::TagReadFailed { reason } => write!(f, "TAG_READ_FAILED ({})", reason),
            StateEvent::TagWritten { .. } => write!(f, "TAG_WRITTEN"),
            StateEvent::TagWriteFailed { reason } => {
                write!(f, "TAG_WRITE_FAILED ({})", reason)
            }
            StateEvent::ResultDropped => write!(f, "RESULT_DROPPED"),
        }
    }
}

impl StateEvent {
    /// Text worth reading aloud, if this event carries any
    pub fn spoken_text(&self) -> Option<&str> {
        match self {
            StateEvent::ScanCompleted { text, .. } | StateEvent::TagRead { text, .. } => {
                Some(text.as_str())
            }
            _ => None,
        }
    }
}
