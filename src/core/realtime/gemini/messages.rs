//! Gemini Live wire messages.
//!
//! Client messages are externally tagged objects with exactly one key
//! (`setup`, `realtimeInput`, `toolResponse`). Server messages carry one of
//! `setupComplete`, `serverContent`, `toolCall`, `toolCallCancellation` or
//! `goAway`; [`ServerMessage::into_events`] flattens them into ordered
//! [`LiveEvent`]s.

use serde::{Deserialize, Serialize};

use super::config::ResponseModality;
use crate::core::media::MediaBlob;
use crate::core::realtime::base::{
    FunctionCall, FunctionDeclaration, FunctionResponse, LiveEvent,
};

// =============================================================================
// Client Messages
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupConfig),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    pub fn media(chunk: MediaBlob) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: Some(vec![chunk]),
            text: None,
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: None,
            text: Some(text.into()),
        })
    }

    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse { function_responses })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Enables transcription; carries no options.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_chunks: Option<Vec<MediaBlob>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

// =============================================================================
// Shared
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

// =============================================================================
// Server Messages
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub generation_complete: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Flatten into events, preserving the order a client must apply them in:
    /// tool calls, input transcript, output transcript, model parts,
    /// interruption, turn completion.
    pub fn into_events(self) -> Vec<LiveEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(LiveEvent::SetupComplete);
        }

        if let Some(tool_call) = self.tool_call
            && !tool_call.function_calls.is_empty()
        {
            events.push(LiveEvent::ToolCall(tool_call.function_calls));
        }

        if let Some(content) = self.server_content {
            if let Some(text) = content.input_transcription.and_then(|t| t.text)
                && !text.is_empty()
            {
                events.push(LiveEvent::InputTranscription(text));
            }
            if let Some(text) = content.output_transcription.and_then(|t| t.text)
                && !text.is_empty()
            {
                events.push(LiveEvent::OutputTranscription(text));
            }
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        events.push(LiveEvent::Audio(blob));
                    } else if let Some(text) = part.text {
                        events.push(LiveEvent::ModelText(text));
                    }
                }
            }
            if content.interrupted {
                events.push(LiveEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(LiveEvent::TurnComplete);
            }
        }

        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(LiveEvent::ToolCallCancellation(cancellation.ids));
        }

        if let Some(go_away) = self.go_away {
            events.push(LiveEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        events
    }
}
