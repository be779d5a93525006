//! Scan modes selected with the mode button

use serde::{Deserialize, Serialize};

/// What the camera scan is asked to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Transcribe printed text
    TextReading,
    /// Name the primary object in view
    ObjectDetect,
    /// Transcribe Braille dots into English
    BrailleRead,
}

impl Default for Mode {
    fn default() -> Self {
        Self::TextReading
    }
}

impl Mode {
    /// The mode that follows this one on a mode button press
    pub fn next(self) -> Self {
        match self {
            Mode::TextReading => Mode::ObjectDetect,
            Mode::ObjectDetect => Mode::BrailleRead,
            Mode::BrailleRead => Mode::TextReading,
        }
    }

    /// Label shown on the second LCD line
    pub fn label(self) -> &'static str {
        match self {
            Mode::TextReading => "Text Reading",
            Mode::ObjectDetect => "Object Detect",
            Mode::BrailleRead => "Braille Read",
        }
    }

    /// Instruction sent to the vision model alongside the frame
    pub fn prompt(self) -> &'static str {
        match self {
            Mode::TextReading => {
                "Transcribe the text in this image exactly as it appears. \
                 Respond with ONLY the raw text string. No conversational filler."
            }
            Mode::ObjectDetect => {
                "Identify the primary object in this image. \
                 Respond with ONLY the object name (e.g. 'Red Coffee Mug'). \
                 Do not use full sentences."
            }
            Mode::BrailleRead => {
                "Transcribe the Braille dots in this image into English text. \
                 Respond with ONLY the translated text string. Do not include explanations."
            }
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
