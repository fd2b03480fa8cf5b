//! Gemini Live API module.
//!
//! # Features
//!
//! - Bidirectional audio streaming with native audio output
//! - Input and output transcription
//! - Still-frame video input (JPEG)
//! - Function calling
//! - Server-side interruption on user barge-in
//!
//! # Audio Format
//!
//! Input audio is PCM 16-bit signed little-endian at 16kHz; output audio is
//! the same encoding at 24kHz.

mod client;
mod config;
pub mod messages;

pub use client::GeminiLive;
pub use config::{
    DEFAULT_GEMINI_MODEL, GEMINI_INPUT_SAMPLE_RATE, GEMINI_LIVE_URL, GEMINI_OUTPUT_SAMPLE_RATE,
    GeminiVoice, ResponseModality, model_resource_name,
};
