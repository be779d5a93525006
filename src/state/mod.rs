//! State machine module for scan, confirm and tag actions
//!
//! Provides an explicit state machine with two states:
//! - Idle: single tap scans, double tap reads a tag
//! - Confirming: a scan result is pending; single tap writes it to a tag,
//!   double tap drops it
//!
//! The scan mode is held alongside and cycled by the mode button.

mod machine;
mod mode;

pub use machine::{State, StateMachine};
pub use mode::Mode;
