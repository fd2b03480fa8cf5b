//! Gemini Live API configuration types.

use serde::{Deserialize, Serialize};

/// Gemini Live bidirectional streaming endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Sample rate Gemini expects for input audio.
pub const GEMINI_INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio produced by Gemini.
pub const GEMINI_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Resource name for a model id (`models/<id>`).
pub fn model_resource_name(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

// =============================================================================
// Modalities
// =============================================================================

/// Output modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    #[default]
    Audio,
    Text,
}

// =============================================================================
// Voices
// =============================================================================

/// Prebuilt voices for native audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeminiVoice {
    #[default]
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

impl GeminiVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
            Self::Leda => "Leda",
            Self::Orus => "Orus",
            Self::Zephyr => "Zephyr",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "puck" => Self::Puck,
            "charon" => Self::Charon,
            "kore" => Self::Kore,
            "fenrir" => Self::Fenrir,
            "aoede" => Self::Aoede,
            "leda" => Self::Leda,
            "orus" => Self::Orus,
            "zephyr" => Self::Zephyr,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for GeminiVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
