//! Keyboard fallback on stdin
//!
//! Useful when the buttons are out of reach: an empty line or `read` scans,
//! `nfc` reads a tag, `q` quits.
//!
//! Lines are read on a detached thread and handed over a channel. A blocking
//! read there never holds up runtime shutdown.

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::display::TextDisplay;
use crate::nfc::NfcStore;
use crate::state::StateMachine;
use crate::vision::Scanner;

/// Commands accepted at the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Scan,
    ReadTag,
    Quit,
}

impl Command {
    /// Parse one input line; unknown input is ignored
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "" | "read" => Some(Command::Scan),
            "nfc" => Some(Command::ReadTag),
            "q" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Start a thread forwarding lines from `input`
///
/// The channel closes at end of input or on a read error.
pub fn read_lines<R>(input: R) -> std::io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (line_tx, line_rx) = mpsc::channel(8);

    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in input.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        debug!(?e, "stdin unreadable");
                        break;
                    }
                };
                if line_tx.blocking_send(line).is_err() {
                    break;
                }
            }
            debug!("stdin reader thread stopped");
        })?;

    Ok(line_rx)
}

/// Serve commands from `lines` until `q`
///
/// A closed channel only disables the fallback; the daemon keeps running on
/// its buttons.
pub async fn run<S, N, D>(mut lines: mpsc::Receiver<String>, machine: Arc<StateMachine<S, N, D>>)
where
    S: Scanner,
    N: NfcStore,
    D: TextDisplay,
{
    loop {
        let Some(line) = lines.recv().await else {
            debug!("stdin closed, keyboard fallback disabled");
            std::future::pending::<()>().await;
            return;
        };

        match Command::parse(&line) {
            Some(Command::Scan) => {
                machine.perform_scan().await;
            }
            Some(Command::ReadTag) => machine.read_tag().await,
            Some(Command::Quit) => {
                info!("quit requested from keyboard");
                machine.say_goodbye().await;
                return;
            }
            None => debug!(%line, "unknown command ignored"),
        }
    }
}
