//! tapscan-daemon: handheld scan-and-tag assistant
//!
//! Runs on a Raspberry Pi with a camera, a 16x2 character LCD, an MFRC522
//! reader and two buttons:
//! - Trigger button: single tap scans (or writes the pending result to a
//!   tag), double tap reads a tag (or drops the pending result)
//! - Mode button: cycles text reading, object detection and braille reading
//! - Speech output of scan results and tag contents
//! - Keyboard fallback on stdin

mod board;
mod config;
mod display;
mod events;
mod input;
mod lifecycle;
mod nfc;
mod speech;
mod state;
#[cfg(test)]
mod testing;
mod vision;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::board::Board;
use crate::config::Config;
use crate::display::TextDisplay;
use crate::events::StateEvent;
use crate::input::{keyboard, Dispatcher, ModeSelector, PressDetector, TapDetector};
use crate::lifecycle::ShutdownSignal;
use crate::speech::{AudioPlayer, SpeechClient, Speaker};
use crate::state::StateMachine;
use crate::vision::{StillCamera, VisionClient, VisionScanner};

const BOOT_SCREEN_HOLD: std::time::Duration = std::time::Duration::from_millis(1000);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "tapscan-daemon starting"
    );

    // Load configuration and keys; a missing key stops here
    let config = Config::load()?;
    config.ensure_dirs()?;
    let credentials = config.load_credentials()?;
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let settings = &config.settings;
    let mut shutdown = ShutdownSignal::new()?;

    let board = Board::open(&settings.gpio, &settings.nfc)?;
    board.display.show("System Booting...", "");

    let scanner = VisionScanner::new(
        StillCamera::new(&settings.camera.command)?,
        VisionClient::new(
            &credentials.vision_key,
            &settings.vision.model,
            settings.vision.max_tokens,
        )?,
    );

    // State machine -> speech output and event log
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);
    let mut log_rx = event_tx.subscribe();

    if let Some(key) = &credentials.speech_key {
        let client = SpeechClient::new(key, &settings.speech.voice_id, &settings.speech.model_id)?;
        let player = AudioPlayer::new(&settings.speech.player, &config.audio_path());
        tokio::spawn(Speaker::new(client, player).run(event_tx.subscribe()));
    } else {
        info!("speech output disabled");
    }

    let machine = Arc::new(StateMachine::new(
        scanner,
        board.nfc,
        board.display,
        event_tx.clone(),
    ));

    let dispatcher = Dispatcher::new(
        TapDetector::new(board.trigger, settings.buttons.trigger),
        Arc::clone(&machine),
    );
    let selector = ModeSelector::new(
        PressDetector::new(
            board.mode,
            settings.buttons.mode_poll,
            settings.buttons.mode_settle,
        ),
        Arc::clone(&machine),
    );

    let keyboard_lines = keyboard::read_lines(std::io::BufReader::new(std::io::stdin()))?;

    tokio::time::sleep(BOOT_SCREEN_HOLD).await;
    machine.reset_to_ready();

    info!(mode = %machine.mode(), "ready");
    info!("trigger: 1 tap = scan / confirm write, 2 taps = read tag / drop result");
    info!("mode button: next mode; keyboard: enter = scan, nfc = read tag, q = quit");

    // Main event loop
    tokio::select! {
        result = dispatcher.run() => {
            if let Err(e) = result {
                error!(%e, "trigger button failed");
            }
        }

        result = selector.run() => {
            if let Err(e) = result {
                error!(%e, "mode button failed");
            }
        }

        _ = keyboard::run(keyboard_lines, Arc::clone(&machine)) => {
            info!("quit requested");
        }

        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => info!(%event, "state event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event log lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event log exited");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!(state = %machine.state(), "shutting down...");

    machine.nfc().stop();
    machine.display().clear();

    info!("tapscan-daemon stopped");

    Ok(())
}
