//! Still camera capture
//!
//! Frames come from an external capture command that writes a JPEG to
//! stdout (`rpicam-still -o -` on Raspberry Pi OS).

use tokio::process::Command;
use tracing::debug;

use super::ScanError;

/// JPEG start-of-image marker
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// One captured JPEG frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
}

/// Captures frames by running a command
#[derive(Debug, Clone)]
pub struct StillCamera {
    program: String,
    args: Vec<String>,
}

impl StillCamera {
    /// `command` is the program followed by its arguments
    pub fn new(command: &[String]) -> Result<Self, ScanError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ScanError::CameraUnavailable("empty capture command".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub async fn capture(&self) -> Result<Frame, ScanError> {
        debug!(program = %self.program, "capturing frame");

        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScanError::CameraUnavailable(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::CaptureFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        if !output.stdout.starts_with(&JPEG_SOI) {
            return Err(ScanError::CaptureFailed(format!(
                "{} produced {} bytes that are not a JPEG",
                self.program,
                output.stdout.len()
            )));
        }

        debug!(bytes = output.stdout.len(), "frame captured");
        Ok(Frame {
            jpeg: output.stdout,
        })
    }
}
