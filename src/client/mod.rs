//! Native client for the relay.
//!
//! [`ClientSession`] connects to a relay's `/realtime` endpoint, streams
//! locally captured media, schedules received model audio on an output
//! device and reports transcripts and status to a [`ClientObserver`].
//!
//! Audio devices stay outside this module: the input callback feeds a
//! [`CapturePipeline`](crate::core::media::CapturePipeline) sharing the
//! session's [`CaptureControl`](crate::core::media::CaptureControl), and the
//! output callback pulls from a
//! [`TimelineRenderer`](crate::core::media::TimelineRenderer).

mod session;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::core::turn::Turn;

pub use session::{ClientCommand, ClientFlow, ClientHandle, ClientSession};

/// Errors of the native client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The relay reported an error; the session was stopped.
    #[error("Server error: {0}")]
    Server(String),
}

/// What the user should be told about the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStatus {
    Disconnected,
    Connecting,
    Listening,
    Muted,
    ModelSpeaking,
    CameraUnavailable,
    Error(String),
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientStatus::Disconnected => write!(f, "Click to start the conversation"),
            ClientStatus::Connecting => write!(f, "Connecting..."),
            ClientStatus::Listening => write!(f, "Listening..."),
            ClientStatus::Muted => write!(f, "Muted"),
            ClientStatus::ModelSpeaking => write!(f, "Gemini is speaking..."),
            ClientStatus::CameraUnavailable => write!(f, "Could not access camera."),
            ClientStatus::Error(message) => write!(f, "Error: {message}. Please try again."),
        }
    }
}

/// Receives everything the user interface renders.
///
/// Called from the session task; implementations must not block.
pub trait ClientObserver: Send + Sync {
    fn on_status(&self, _status: &ClientStatus) {}

    /// Accumulated user text of the current turn.
    fn on_user_transcript(&self, _text: &str) {}

    /// Accumulated model text of the current turn.
    fn on_model_transcript(&self, _text: &str) {}

    fn on_turn_complete(&self, _turn: &Turn) {}

    /// The partial model transcript must be discarded.
    fn on_interrupted(&self) {}

    fn on_tool_call(&self, _name: &str, _args: &Value, _result: &str) {}
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ClientObserver for LogObserver {
    fn on_status(&self, status: &ClientStatus) {
        tracing::info!(status = %status, "Client status");
    }

    fn on_turn_complete(&self, turn: &Turn) {
        tracing::info!(user = %turn.user_text, model = %turn.model_text, "Turn complete");
    }

    fn on_tool_call(&self, name: &str, args: &Value, result: &str) {
        tracing::info!(tool = %name, args = %args, result = %result, "Tool executed");
    }
}
