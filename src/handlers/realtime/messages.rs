//! Relay WebSocket message types
//!
//! Every message is one JSON text frame tagged by `type`. Media travels as
//! base64 inside the JSON payload, never as binary frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::media::{MediaBlob, OutboundMedia};

/// Maximum allowed size for text input (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for one base64 media payload (4 MB)
pub const MAX_MEDIA_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming WebSocket messages from the client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RealtimeIncomingMessage {
    /// Open an upstream session
    StartSession,

    /// Close the upstream session; the socket stays open
    StopSession,

    /// One chunk of 16 kHz PCM microphone audio
    AudioData { payload: MediaBlob },

    /// One JPEG camera frame
    VideoFrame { payload: MediaBlob },

    /// Typed user input
    TextInput { payload: String },
}

impl From<OutboundMedia> for RealtimeIncomingMessage {
    fn from(media: OutboundMedia) -> Self {
        match media {
            OutboundMedia::Audio(payload) => Self::AudioData { payload },
            OutboundMedia::Video(payload) => Self::VideoFrame { payload },
        }
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing WebSocket messages to the client
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RealtimeOutgoingMessage {
    /// The upstream session accepted its setup
    SessionStarted,

    /// The upstream session ended
    SessionClosed,

    /// Accumulated user transcript for the current turn
    UserTranscription { text: String },

    /// Accumulated model transcript for the current turn
    GeminiTranscription { text: String },

    /// Final transcripts of a completed turn
    #[serde(rename_all = "camelCase")]
    TurnComplete {
        final_user_text: String,
        final_model_text: String,
    },

    /// A tool ran on behalf of the model
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_name: String,
        tool_args: Value,
        tool_result: String,
    },

    /// Base64 PCM model audio (24 kHz mono)
    AudioData { data: String },

    /// The model's turn was cut short; playback must be flushed
    Interrupted,

    /// Error message
    Error { message: String },
}

impl RealtimeOutgoingMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

// =============================================================================
// Message Routing
// =============================================================================

/// Work for the socket sender task
#[derive(Debug)]
pub enum RealtimeMessageRoute {
    /// JSON text message
    Outgoing(RealtimeOutgoingMessage),
    /// Close connection
    Close,
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for message validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeValidationError {
    #[error("Text too large: {size} bytes (max: {max} bytes)")]
    TextTooLarge { size: usize, max: usize },

    #[error("Media payload too large: {size} bytes (max: {max} bytes)")]
    MediaTooLarge { size: usize, max: usize },
}

impl RealtimeIncomingMessage {
    /// Validates message field sizes to prevent resource exhaustion attacks.
    pub fn validate_size(&self) -> Result<(), RealtimeValidationError> {
        match self {
            Self::TextInput { payload } => {
                let size = payload.len();
                if size > MAX_TEXT_SIZE {
                    return Err(RealtimeValidationError::TextTooLarge {
                        size,
                        max: MAX_TEXT_SIZE,
                    });
                }
            }
            Self::AudioData { payload } | Self::VideoFrame { payload } => {
                let size = payload.data.len();
                if size > MAX_MEDIA_PAYLOAD_SIZE {
                    return Err(RealtimeValidationError::MediaTooLarge {
                        size,
                        max: MAX_MEDIA_PAYLOAD_SIZE,
                    });
                }
            }
            Self::StartSession | Self::StopSession => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_message_deserialization() {
        let msg: RealtimeIncomingMessage =
            serde_json::from_str(r#"{"type":"start-session"}"#).unwrap();
        assert_eq!(msg, RealtimeIncomingMessage::StartSession);

        let msg: RealtimeIncomingMessage =
            serde_json::from_str(r#"{"type":"stop-session"}"#).unwrap();
        assert_eq!(msg, RealtimeIncomingMessage::StopSession);
    }

    #[test]
    fn test_audio_message_deserialization() {
        let json = r#"{
            "type": "audio-data",
            "payload": {"data": "AAAA", "mimeType": "audio/pcm;rate=16000"}
        }"#;

        let msg: RealtimeIncomingMessage = serde_json::from_str(json).unwrap();
        match msg {
            RealtimeIncomingMessage::AudioData { payload } => {
                assert_eq!(payload.data, "AAAA");
                assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
            }
            other => panic!("Expected AudioData, got {other:?}"),
        }
    }

    #[test]
    fn test_text_message_deserialization() {
        let msg: RealtimeIncomingMessage =
            serde_json::from_str(r#"{"type":"text-input","payload":"hello"}"#).unwrap();
        assert_eq!(
            msg,
            RealtimeIncomingMessage::TextInput {
                payload: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<RealtimeIncomingMessage, _> =
            serde_json::from_str(r#"{"type":"config"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_outbound_media_conversion() {
        let blob = MediaBlob {
            data: "AAAA".to_string(),
            mime_type: "image/jpeg".to_string(),
        };
        let msg: RealtimeIncomingMessage = OutboundMedia::Video(blob.clone()).into();
        assert_eq!(msg, RealtimeIncomingMessage::VideoFrame { payload: blob });
    }

    #[test]
    fn test_turn_complete_serialization() {
        let msg = RealtimeOutgoingMessage::TurnComplete {
            final_user_text: "what time is it".to_string(),
            final_model_text: "noon".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "turn-complete",
                "finalUserText": "what time is it",
                "finalModelText": "noon"
            })
        );
    }

    #[test]
    fn test_tool_call_serialization() {
        let msg = RealtimeOutgoingMessage::ToolCall {
            tool_name: "getCurrentTime".to_string(),
            tool_args: json!({"timezone": "Asia/Tokyo"}),
            tool_result: "The current time for the timezone Asia/Tokyo is 11:05 PM.".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "tool-call");
        assert_eq!(value["toolName"], "getCurrentTime");
        assert_eq!(value["toolArgs"]["timezone"], "Asia/Tokyo");
        assert!(value["toolResult"].as_str().unwrap().ends_with("11:05 PM."));
    }

    #[test]
    fn test_simple_outgoing_serialization() {
        assert_eq!(
            serde_json::to_string(&RealtimeOutgoingMessage::SessionStarted).unwrap(),
            r#"{"type":"session-started"}"#
        );
        assert_eq!(
            serde_json::to_string(&RealtimeOutgoingMessage::Interrupted).unwrap(),
            r#"{"type":"interrupted"}"#
        );
        assert_eq!(
            serde_json::to_value(RealtimeOutgoingMessage::GeminiTranscription {
                text: "hi".to_string()
            })
            .unwrap(),
            json!({"type": "gemini-transcription", "text": "hi"})
        );
        assert_eq!(
            serde_json::to_value(RealtimeOutgoingMessage::error("boom")).unwrap(),
            json!({"type": "error", "message": "boom"})
        );
    }

    #[test]
    fn test_validation_text_within_limit() {
        let msg = RealtimeIncomingMessage::TextInput {
            payload: "a".repeat(MAX_TEXT_SIZE),
        };
        assert!(msg.validate_size().is_ok());
    }

    #[test]
    fn test_validation_text_exceeds_limit() {
        let msg = RealtimeIncomingMessage::TextInput {
            payload: "a".repeat(MAX_TEXT_SIZE + 1),
        };
        assert_eq!(
            msg.validate_size(),
            Err(RealtimeValidationError::TextTooLarge {
                size: MAX_TEXT_SIZE + 1,
                max: MAX_TEXT_SIZE
            })
        );
    }

    #[test]
    fn test_validation_media_exceeds_limit() {
        let msg = RealtimeIncomingMessage::AudioData {
            payload: MediaBlob {
                data: "A".repeat(MAX_MEDIA_PAYLOAD_SIZE + 4),
                mime_type: "audio/pcm;rate=16000".to_string(),
            },
        };
        assert!(matches!(
            msg.validate_size(),
            Err(RealtimeValidationError::MediaTooLarge { .. })
        ));
    }
}
