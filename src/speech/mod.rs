//! Speech output
//!
//! Listens to state events and reads tag contents and scan results aloud:
//! the text goes to a text-to-speech API, the returned MP3 is written to the
//! data directory and played with an external player.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;

const TTS_BASE_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors while speaking one piece of text
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("speech request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("speech API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid speech API key")]
    InvalidKey,

    #[error("failed to write audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio player exited with {0}")]
    Player(std::process::ExitStatus),
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Text-to-speech API client
#[derive(Debug, Clone)]
pub struct SpeechClient {
    client: reqwest::Client,
    voice_id: String,
    model_id: String,
}

impl SpeechClient {
    pub fn new(api_key: &str, voice_id: &str, model_id: &str) -> Result<Self, SpeechError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key).map_err(|_| SpeechError::InvalidKey)?;
        key.set_sensitive(true);
        headers.insert("xi-api-key", key);
        headers.insert(ACCEPT, HeaderValue::from_static("audio/mpeg"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            voice_id: voice_id.to_string(),
            model_id: model_id.to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{TTS_BASE_URL}/{}", self.voice_id)
    }

    /// Convert `text` into MP3 audio
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        debug!(voice = %self.voice_id, "requesting speech");

        let response = self
            .client
            .post(self.url())
            .json(&SynthesisRequest {
                text,
                model_id: &self.model_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Plays audio files with an external command
#[derive(Debug, Clone)]
pub struct AudioPlayer {
    program: String,
    args: Vec<String>,
    output_path: PathBuf,
}

impl AudioPlayer {
    /// `command` is the player followed by its arguments; the file path is
    /// appended when playing
    pub fn new(command: &[String], output_path: &Path) -> Self {
        let (program, args) = command
            .split_first()
            .map(|(p, a)| (p.clone(), a.to_vec()))
            .unwrap_or_else(|| ("mpg123".to_string(), vec!["-q".to_string()]));
        Self {
            program,
            args,
            output_path: output_path.to_owned(),
        }
    }

    pub async fn play(&self, audio: &[u8]) -> Result<(), SpeechError> {
        tokio::fs::write(&self.output_path, audio).await?;

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.output_path)
            .status()
            .await?;
        if !status.success() {
            return Err(SpeechError::Player(status));
        }
        Ok(())
    }
}

/// Speaks events one at a time
pub struct Speaker {
    client: SpeechClient,
    player: AudioPlayer,
}

impl Speaker {
    pub fn new(client: SpeechClient, player: AudioPlayer) -> Self {
        Self { client, player }
    }

    pub async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        info!(%text, "speaking");
        let audio = self.client.synthesize(text).await?;
        self.player.play(&audio).await
    }

    /// Speak every event that carries text until the channel closes
    pub async fn run(self, mut event_rx: broadcast::Receiver<StateEvent>) {
        info!("speech output started");

        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let Some(text) = event.spoken_text() else {
                        continue;
                    };
                    if let Err(e) = self.speak(text).await {
                        error!(%e, "speech failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "speech fell behind, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }

        info!("speech output stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(SynthesisRequest {
            text: "hello hello bye",
            model_id: "eleven_monolingual_v1",
        })
        .unwrap();
        assert_eq!(body["text"], "hello hello bye");
        assert_eq!(body["model_id"], "eleven_monolingual_v1");
    }

    #[test]
    fn test_url_includes_voice() {
        let client = SpeechClient::new("key", "hpp4J3VqNfWAUOO0d1Us", "eleven_monolingual_v1")
            .unwrap();
        assert_eq!(
            client.url(),
            "https://api.elevenlabs.io/v1/text-to-speech/hpp4J3VqNfWAUOO0d1Us"
        );
    }

    #[test]
    fn test_key_with_newline_rejected() {
        assert!(matches!(
            SpeechClient::new("bad\nkey", "voice", "model"),
            Err(SpeechError::InvalidKey)
        ));
    }

    #[test]
    fn test_player_defaults_when_command_empty() {
        let player = AudioPlayer::new(&[], Path::new("/tmp/out.mp3"));
        assert_eq!(player.program, "mpg123");
        assert_eq!(player.args, vec!["-q".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_text_is_not_spoken() {
        let client = SpeechClient::new("key", "voice", "model").unwrap();
        let player = AudioPlayer::new(
            &["/nonexistent/player".to_string()],
            Path::new("/nonexistent/dir/out.mp3"),
        );
        let speaker = Speaker::new(client, player);
        tokio_test::assert_ok!(speaker.speak("   ").await);
    }

    #[tokio::test]
    async fn test_player_failure_reported() {
        let path = std::env::temp_dir().join(format!("tapscan-test-{}.mp3", std::process::id()));
        let player = AudioPlayer::new(&["false".to_string()], &path);

        let result = player.play(b"ID3").await;

        assert!(matches!(result, Err(SpeechError::Player(_))));
        let _ = std::fs::remove_file(&path);
    }
}
