//! NFC tag storage
//!
//! A tag holds one short text payload. Reads and writes block until a tag
//! is held against the reader; the MFRC522 work runs on the blocking pool
//! so the async tasks are not stalled.

mod mfrc522;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use embedded_hal::spi::SpiDevice;
use tracing::debug;

pub use mfrc522::Mfrc522;

/// Maximum characters stored on a tag
pub const MAX_PAYLOAD: usize = 48;

/// Data blocks holding the payload (sector 2)
pub const PAYLOAD_BLOCKS: [u8; 3] = [8, 9, 10];

/// Contents of a tag read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagContents {
    /// Tag UID folded into an integer
    pub id: u64,
    /// Stored text with padding removed
    pub text: String,
}

/// Errors from tag operations
#[derive(Debug, thiserror::Error)]
pub enum NfcError {
    #[error("reader bus error: {0}")]
    Bus(String),

    #[error("tag exchange failed: {0}")]
    Protocol(String),

    #[error("tag wait aborted")]
    Aborted,

    #[error("reader worker failed: {0}")]
    Worker(String),
}

/// Blocking read/write of a short text payload on a tag
pub trait NfcStore: Send + Sync {
    /// Wait for a tag and read its payload
    fn read(&self) -> impl Future<Output = Result<TagContents, NfcError>> + Send;

    /// Wait for a tag and store `text`, truncated to [`MAX_PAYLOAD`]
    fn write(&self, text: String) -> impl Future<Output = Result<(), NfcError>> + Send;
}

/// Encode text as the fixed-size tag payload
///
/// Truncates to [`MAX_PAYLOAD`] characters, replaces anything outside ASCII
/// with `?`, and pads with spaces.
pub fn encode_payload(text: &str) -> [u8; MAX_PAYLOAD] {
    let mut payload = [b' '; MAX_PAYLOAD];
    for (slot, c) in payload.iter_mut().zip(text.chars()) {
        *slot = if c.is_ascii() { c as u8 } else { b'?' };
    }
    payload
}

/// Decode a payload read from a tag, one character per byte
pub fn decode_payload(payload: &[u8]) -> String {
    let text: String = payload
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect();
    text.trim().to_string()
}

/// [`NfcStore`] backed by an MFRC522 reader
pub struct TagStore<S> {
    reader: Arc<Mutex<Mfrc522<S>>>,
    stop: Arc<AtomicBool>,
}

impl<S> TagStore<S>
where
    S: SpiDevice + Send + 'static,
{
    pub fn new(reader: Mfrc522<S>) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort any pending tag wait; used at shutdown
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, NfcError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Mfrc522<S>, &AtomicBool) -> Result<T, NfcError> + Send + 'static,
    {
        let reader = Arc::clone(&self.reader);
        let stop = Arc::clone(&self.stop);

        tokio::task::spawn_blocking(move || {
            let mut reader = reader
                .lock()
                .map_err(|_| NfcError::Worker("reader lock poisoned".to_string()))?;
            op(&mut *reader, &*stop)
        })
        .await
        .map_err(|e| NfcError::Worker(e.to_string()))?
    }
}

impl<S> NfcStore for TagStore<S>
where
    S: SpiDevice + Send + 'static,
{
    async fn read(&self) -> Result<TagContents, NfcError> {
        debug!("waiting for tag to read");
        self.run_blocking(|reader, stop| reader.wait_read(stop)).await
    }

    async fn write(&self, text: String) -> Result<(), NfcError> {
        debug!(%text, "waiting for tag to write");
        let id = self
            .run_blocking(move |reader, stop| reader.wait_write(&text, stop))
            .await?;
        debug!(id, "tag written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pads_short_text() {
        let payload = encode_payload("Red Mug");
        assert_eq!(&payload[..7], b"Red Mug");
        assert!(payload[7..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_encode_truncates_to_max_payload() {
        let text = "x".repeat(60);
        let payload = encode_payload(&text);
        assert_eq!(payload.len(), MAX_PAYLOAD);
        assert!(payload.iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_encode_replaces_non_ascii() {
        let payload = encode_payload("naïve");
        assert_eq!(&payload[..5], b"na?ve");
    }

    #[test]
    fn test_decode_trims_padding() {
        assert_eq!(decode_payload(&encode_payload("  Milk  ")), "Milk");
        assert_eq!(decode_payload(b"Soup\0\0\0"), "Soup");
    }

    #[test]
    fn test_payload_fits_blocks() {
        assert_eq!(PAYLOAD_BLOCKS.len() * 16, MAX_PAYLOAD);
    }
}
