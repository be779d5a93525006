//! Configuration loading and management
//!
//! Paths come from `$HOME`; device settings come from an optional TOML file
//! with defaults for the reference wiring (BCM line numbers).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::input::{millis, TapTiming};

/// Fatal errors before the device is up
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("could not find key file at {}", path.display())]
    MissingCredential { path: PathBuf },

    #[error("key file at {} is empty", path.display())]
    EmptyCredential { path: PathBuf },

    #[error("hardware init failed ({device}): {message}")]
    Hardware { device: &'static str, message: String },
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime data (synthesized audio)
    pub data_dir: PathBuf,

    /// Key file for the vision API
    pub vision_key_path: PathBuf,

    /// Key file for the speech API
    pub speech_key_path: PathBuf,

    /// Settings from the config file, or defaults
    pub settings: Settings,
}

/// Device settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gpio: GpioSettings,
    pub buttons: ButtonSettings,
    pub nfc: NfcSettings,
    pub camera: CameraSettings,
    pub vision: VisionSettings,
    pub speech: SpeechSettings,
}

/// GPIO line offsets on the chip (BCM numbering on a Raspberry Pi)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioSettings {
    pub chip: PathBuf,
    pub trigger_button: u32,
    pub mode_button: u32,
    pub lcd_rs: u32,
    pub lcd_e: u32,
    /// D4, D5, D6, D7
    pub lcd_data: [u32; 4],
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            chip: PathBuf::from("/dev/gpiochip0"),
            trigger_button: 27,
            mode_button: 4,
            lcd_rs: 26,
            lcd_e: 19,
            lcd_data: [13, 6, 5, 16],
        }
    }
}

/// Button timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ButtonSettings {
    pub trigger: TapTiming,
    /// Mode button poll interval
    #[serde(with = "millis")]
    pub mode_poll: Duration,
    /// Quiet period after a mode press
    #[serde(with = "millis")]
    pub mode_settle: Duration,
}

impl Default for ButtonSettings {
    fn default() -> Self {
        Self {
            trigger: TapTiming::default(),
            mode_poll: Duration::from_millis(50),
            mode_settle: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NfcSettings {
    pub spi_device: PathBuf,
    pub spi_speed_hz: u32,
    /// Reader reset line, held high while running
    pub reset_line: Option<u32>,
}

impl Default for NfcSettings {
    fn default() -> Self {
        Self {
            spi_device: PathBuf::from("/dev/spidev0.0"),
            spi_speed_hz: 1_000_000,
            reset_line: Some(25),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Program and arguments that write one JPEG frame to stdout
    pub command: Vec<String>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let command = [
            "rpicam-still",
            "--nopreview",
            "--immediate",
            "--width",
            "640",
            "--height",
            "480",
            "--quality",
            "70",
            "--encoding",
            "jpg",
            "--output",
            "-",
        ];
        Self {
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    pub model: String,
    pub max_tokens: u32,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5-20251001".to_string(),
            max_tokens: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub enabled: bool,
    pub voice_id: String,
    pub model_id: String,
    /// Player program and arguments; the audio file path is appended
    pub player: Vec<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            voice_id: "hpp4J3VqNfWAUOO0d1Us".to_string(),
            model_id: "eleven_monolingual_v1".to_string(),
            player: vec!["mpg123".to_string(), "-q".to_string()],
        }
    }
}

/// API keys read at startup
#[derive(Clone)]
pub struct Credentials {
    pub vision_key: String,
    pub speech_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("vision_key", &"<redacted>")
            .field("speech_key", &self.speech_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = PathBuf::from(std::env::var("HOME").context("HOME is not set")?);
        let settings_path = std::env::var_os("TAPSCAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config").join("tapscan").join("config.toml"));

        let settings = if settings_path.exists() {
            Settings::from_file(&settings_path)?
        } else {
            Settings::default()
        };

        Ok(Self::with_home(&home, settings))
    }

    fn with_home(home: &Path, settings: Settings) -> Self {
        Self {
            data_dir: home.join(".local").join("share").join("tapscan"),
            vision_key_path: home.join("KEY.txt"),
            speech_key_path: home.join("KEY1.txt"),
            settings,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }

    /// Where synthesized speech is written before playing
    pub fn audio_path(&self) -> PathBuf {
        self.data_dir.join("output.mp3")
    }

    /// Read the API keys; the speech key is only required when speech is on
    pub fn load_credentials(&self) -> Result<Credentials, StartupError> {
        let vision_key = read_key(&self.vision_key_path)?;
        let speech_key = if self.settings.speech.enabled {
            Some(read_key(&self.speech_key_path)?)
        } else {
            None
        };
        Ok(Credentials {
            vision_key,
            speech_key,
        })
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

fn read_key(path: &Path) -> Result<String, StartupError> {
    let key = std::fs::read_to_string(path).map_err(|_| StartupError::MissingCredential {
        path: path.to_owned(),
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(StartupError::EmptyCredential {
            path: path.to_owned(),
        });
    }
    Ok(key.to_string())
}
