//! Base traits and types for live multimodal model providers.
//!
//! A provider holds one bidirectional connection to a hosted model. Media
//! chunks and text go up; transcripts, audio, turn signals and tool calls come
//! back as an ordered stream of [`LiveEvent`]s delivered to a single callback,
//! so the session that owns the provider sees upstream traffic in receive
//! order.
//!
//! # Audio Format
//!
//! Input audio is PCM 16-bit signed little-endian at 16kHz, output audio is
//! the same encoding at 24kHz. Both travel base64-encoded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::core::media::MediaBlob;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Base configuration for live providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model to use (e.g., "gemini-2.5-flash-native-audio-preview-09-2025")
    #[serde(default)]
    pub model: String,

    /// WebSocket endpoint override; the provider default is used when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Prebuilt voice name for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the model
    #[serde(default)]
    pub system_instruction: Option<String>,

    /// Request transcription of user audio
    #[serde(default)]
    pub input_transcription: bool,

    /// Request transcription of model audio
    #[serde(default)]
    pub output_transcription: bool,

    /// Declared tool capabilities
    #[serde(default)]
    pub tools: Vec<FunctionDeclaration>,
}

/// Declaration of a callable capability, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// Parameter schema
    pub parameters: serde_json::Value,
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for live providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection failed or was lost
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Correlation id, echoed in the response
    #[serde(default)]
    pub id: String,
    /// Function name
    pub name: String,
    /// JSON arguments
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Result of a tool invocation, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: serde_json::Value,
}

impl FunctionResponse {
    /// Wrap a textual result as `{ "result": <text> }`.
    pub fn with_result(id: impl Into<String>, name: impl Into<String>, result: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            response: serde_json::json!({ "result": result }),
        }
    }
}

/// Ordered upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The provider accepted the session setup.
    SetupComplete,
    /// Incremental transcription of user audio.
    InputTranscription(String),
    /// Incremental transcription of model audio.
    OutputTranscription(String),
    /// A chunk of model audio, still base64-encoded.
    Audio(MediaBlob),
    /// Text produced by the model alongside (or instead of) audio.
    ModelText(String),
    /// The model finished its turn.
    TurnComplete,
    /// The model's turn was cut short by user activity.
    Interrupted,
    /// The model requests tool invocations.
    ToolCall(Vec<FunctionCall>),
    /// Pending tool invocations are no longer needed.
    ToolCallCancellation(Vec<String>),
    /// The provider will close the connection soon.
    GoAway { time_left: Option<String> },
    /// The connection closed without being asked to.
    Closed { reason: Option<String> },
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for upstream events.
pub type LiveEventCallback =
    Arc<dyn Fn(LiveEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for error events.
pub type RealtimeErrorCallback =
    Arc<dyn Fn(RealtimeError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for live model providers.
///
/// # Example
///
/// ```rust,ignore
/// use duplex_gateway::core::realtime::{BaseRealtime, GeminiLive, RealtimeConfig};
///
/// let mut live = GeminiLive::new(RealtimeConfig {
///     api_key: "...".to_string(),
///     input_transcription: true,
///     output_transcription: true,
///     ..Default::default()
/// })?;
///
/// live.on_event(Arc::new(|event| Box::pin(async move {
///     println!("{event:?}");
/// })))?;
/// live.connect().await?;
/// live.send_text("Hello").await?;
/// ```
#[async_trait]
pub trait BaseRealtime: Send + Sync {
    /// Create a new provider instance.
    fn new(config: RealtimeConfig) -> RealtimeResult<Self>
    where
        Self: Sized;

    /// Connect and send the session setup.
    async fn connect(&mut self) -> RealtimeResult<()>;

    /// Close the connection. No further events are delivered afterwards.
    async fn disconnect(&mut self) -> RealtimeResult<()>;

    /// Check if the provider is connected and ready.
    fn is_ready(&self) -> bool;

    /// Get the current connection state.
    fn get_connection_state(&self) -> ConnectionState;

    /// Send a media chunk (PCM audio or a JPEG frame).
    async fn send_media(&mut self, chunk: MediaBlob) -> RealtimeResult<()>;

    /// Send user text.
    async fn send_text(&mut self, text: &str) -> RealtimeResult<()>;

    /// Answer tool invocations.
    async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>)
    -> RealtimeResult<()>;

    /// Register the callback receiving upstream events.
    fn on_event(&mut self, callback: LiveEventCallback) -> RealtimeResult<()>;

    /// Register a callback for connection errors.
    fn on_error(&mut self, callback: RealtimeErrorCallback) -> RealtimeResult<()>;

    /// Get provider information.
    fn get_provider_info(&self) -> serde_json::Value;
}

/// Boxed trait object for live providers.
pub type BoxedRealtime = Box<dyn BaseRealtime>;
