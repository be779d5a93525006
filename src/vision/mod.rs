//! Camera scanning
//!
//! A scan captures one still frame and asks a vision-language model to read
//! it. What the model is asked depends on the current [`Mode`].

mod camera;
mod client;

use std::future::Future;

pub use camera::{Frame, StillCamera};
pub use client::VisionClient;

use crate::state::Mode;

/// Errors from a scan attempt
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("vision request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("vision API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("vision model returned no text")]
    EmptyResult,
}

/// Produces a short text reading of whatever is in front of the camera
pub trait Scanner: Send + Sync {
    fn scan(&self, mode: Mode) -> impl Future<Output = Result<String, ScanError>> + Send;
}

/// Camera plus vision model
pub struct VisionScanner {
    camera: StillCamera,
    client: VisionClient,
}

impl VisionScanner {
    pub fn new(camera: StillCamera, client: VisionClient) -> Self {
        Self { camera, client }
    }

    pub async fn capture(&self) -> Result<Frame, ScanError> {
        self.camera.capture().await
    }

    pub async fn analyze(&self, frame: &Frame, mode: Mode) -> Result<String, ScanError> {
        self.client.analyze(frame, mode).await
    }
}

impl Scanner for VisionScanner {
    async fn scan(&self, mode: Mode) -> Result<String, ScanError> {
        let frame = self.capture().await?;
        self.analyze(&frame, mode).await
    }
}
