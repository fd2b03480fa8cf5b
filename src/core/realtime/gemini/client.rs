//! Gemini Live API client implementation.
//!
//! # API Reference
//!
//! - Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<api key>`
//! - Protocol: WebSocket with JSON messages (the server may send them in binary frames)
//! - Audio: PCM 16-bit little-endian, 16kHz in / 24kHz out, base64 encoded
//!
//! The client sends the session `setup` immediately after the socket opens and
//! reports `setupComplete` as [`LiveEvent::SetupComplete`]. A lost connection
//! is reported once as [`LiveEvent::Closed`]; there is no reconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::config::{
    DEFAULT_GEMINI_MODEL, GEMINI_INPUT_SAMPLE_RATE, GEMINI_LIVE_URL, GEMINI_OUTPUT_SAMPLE_RATE,
    GeminiVoice, ResponseModality, model_resource_name,
};
use super::messages::{
    AudioTranscriptionConfig, ClientMessage, Content, GenerationConfig, PrebuiltVoiceConfig,
    ServerMessage, SetupConfig, SpeechConfig, Tool, VoiceConfig,
};
use crate::core::media::MediaBlob;
use crate::core::realtime::base::{
    BaseRealtime, ConnectionState, FunctionResponse, LiveEvent, LiveEventCallback,
    RealtimeConfig, RealtimeError, RealtimeErrorCallback, RealtimeResult,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect` waits for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Outbound {
    Message(ClientMessage),
    Close,
}

// =============================================================================
// Gemini Live Client
// =============================================================================

/// Gemini Live API client.
///
/// All mutable state sits behind `Arc` so the spawned connection task and the
/// owning session share it.
pub struct GeminiLive {
    /// Configuration
    config: RealtimeConfig,
    /// Parsed voice, when one was requested
    voice: Option<GeminiVoice>,
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,
    /// Connected flag for fast checks (shared with connection task)
    connected: Arc<AtomicBool>,

    /// WebSocket sender channel
    ws_sender: Arc<Mutex<Option<mpsc::Sender<Outbound>>>>,

    /// Callbacks
    event_callback: Arc<Mutex<Option<LiveEventCallback>>>,
    error_callback: Arc<Mutex<Option<RealtimeErrorCallback>>>,

    /// Connection task handle
    connection_handle: Arc<Mutex<Option<JoinHandle<()>>>>,

    /// Set by `disconnect` so the task does not report a lost connection
    intentional_disconnect: Arc<AtomicBool>,
}

impl GeminiLive {
    /// Model id without the `models/` prefix.
    pub fn model(&self) -> &str {
        if self.config.model.is_empty() {
            DEFAULT_GEMINI_MODEL
        } else {
            &self.config.model
        }
    }

    pub fn voice(&self) -> Option<GeminiVoice> {
        self.voice
    }

    /// Build the WebSocket URL with the API key parameter.
    fn build_ws_url(&self) -> RealtimeResult<Url> {
        let base = self.config.url.as_deref().unwrap_or(GEMINI_LIVE_URL);
        let mut url = Url::parse(base)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid URL {base}: {e}")))?;
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        Ok(url)
    }

    /// Build the session setup message.
    fn build_setup(&self) -> SetupConfig {
        SetupConfig {
            model: model_resource_name(self.model()),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: self.voice.map(|voice| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.as_str().to_string(),
                        },
                    },
                }),
            },
            system_instruction: self
                .config
                .system_instruction
                .as_ref()
                .map(|text| Content::from_text(text.clone())),
            input_audio_transcription: self
                .config
                .input_transcription
                .then(AudioTranscriptionConfig::default),
            output_audio_transcription: self
                .config
                .output_transcription
                .then(AudioTranscriptionConfig::default),
            tools: if self.config.tools.is_empty() {
                Vec::new()
            } else {
                vec![Tool {
                    function_declarations: self.config.tools.clone(),
                }]
            },
        }
    }

    /// Decode one frame payload and deliver its events in order.
    async fn handle_payload(payload: &[u8], event_cb: &Arc<Mutex<Option<LiveEventCallback>>>) {
        let message = match serde_json::from_slice::<ServerMessage>(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    "Failed to parse Gemini server message: {} - {}",
                    e,
                    String::from_utf8_lossy(payload)
                );
                return;
            }
        };

        let events = message.into_events();
        if events.is_empty() {
            tracing::trace!("Gemini message carried no events");
            return;
        }

        let callback = event_cb.lock().await.clone();
        match callback {
            Some(cb) => {
                for event in events {
                    cb(event).await;
                }
            }
            None => tracing::debug!("No event callback registered, dropping {} events", events.len()),
        }
    }

    /// Send a message to the WebSocket.
    async fn send_message(&self, message: ClientMessage) -> RealtimeResult<()> {
        if let Some(sender) = self.ws_sender.lock().await.as_ref() {
            sender
                .send(Outbound::Message(message))
                .await
                .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }
}

#[async_trait]
impl BaseRealtime for GeminiLive {
    fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let voice = config.voice.as_deref().map(GeminiVoice::from_str_or_default);

        Ok(Self {
            config,
            voice,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            event_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            connection_handle: Arc::new(Mutex::new(None)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn connect(&mut self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Connecting;

        let url = self.build_ws_url()?;

        let (ws_stream, _response) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(connection) => connection,
            Err(e) => {
                *self.state.write().await = ConnectionState::Failed;
                return Err(RealtimeError::ConnectionFailed(e.to_string()));
            }
        };

        tracing::info!(model = %self.model(), "Connected to Gemini Live API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<Outbound>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        let event_cb = self.event_callback.clone();
        let error_cb = self.error_callback.clone();
        let state = self.state.clone();
        let ws_sender = self.ws_sender.clone();
        let connected = self.connected.clone();
        let intentional_disconnect = self.intentional_disconnect.clone();

        self.connected.store(true, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Connected;

        let handle = tokio::spawn(async move {
            let mut close_reason: Option<String> = None;

            loop {
                tokio::select! {
                    Some(outbound) = rx.recv() => {
                        match outbound {
                            Outbound::Message(message) => {
                                let json = match serde_json::to_string(&message) {
                                    Ok(j) => j,
                                    Err(e) => {
                                        tracing::error!("Failed to serialize message: {}", e);
                                        continue;
                                    }
                                };
                                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                    tracing::error!("Failed to send WebSocket message: {}", e);
                                    close_reason = Some(e.to_string());
                                    break;
                                }
                            }
                            Outbound::Close => {
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }

                    Some(msg) = ws_stream.next() => {
                        match msg {
                            Ok(Message::Text(text)) => {
                                Self::handle_payload(text.as_bytes(), &event_cb).await;
                            }
                            Ok(Message::Binary(data)) => {
                                Self::handle_payload(&data, &event_cb).await;
                            }
                            Ok(Message::Close(frame)) => {
                                tracing::info!("Gemini closed the connection: {:?}", frame);
                                close_reason = frame
                                    .map(|f| f.reason.to_string())
                                    .filter(|reason| !reason.is_empty());
                                break;
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                if !intentional_disconnect.load(Ordering::SeqCst)
                                    && let Some(cb) = error_cb.lock().await.clone()
                                {
                                    cb(RealtimeError::WebSocketError(e.to_string())).await;
                                }
                                close_reason = Some(e.to_string());
                                break;
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            connected.store(false, Ordering::SeqCst);
            *ws_sender.lock().await = None;

            if intentional_disconnect.load(Ordering::SeqCst) {
                *state.write().await = ConnectionState::Disconnected;
            } else {
                *state.write().await = ConnectionState::Failed;
                if let Some(cb) = event_cb.lock().await.clone() {
                    cb(LiveEvent::Closed {
                        reason: close_reason,
                    })
                    .await;
                }
            }

            tracing::info!("Gemini Live connection task ended");
        });

        *self.connection_handle.lock().await = Some(handle);

        self.send_message(ClientMessage::Setup(self.build_setup()))
            .await
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        let close_queued = match self.ws_sender.lock().await.take() {
            Some(sender) => match sender.try_send(Outbound::Close) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("Could not queue Gemini close frame: {}", e);
                    false
                }
            },
            None => false,
        };

        if let Some(mut handle) = self.connection_handle.lock().await.take() {
            if !close_queued {
                handle.abort();
            } else if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("Gemini close handshake timed out, aborting connection task");
                handle.abort();
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Disconnected;

        tracing::info!("Disconnected from Gemini Live API");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            self.state
                .try_read()
                .map(|state| *state)
                .unwrap_or(ConnectionState::Disconnected)
        }
    }

    async fn send_media(&mut self, chunk: MediaBlob) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_message(ClientMessage::media(chunk)).await
    }

    async fn send_text(&mut self, text: &str) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_message(ClientMessage::text(text)).await
    }

    async fn send_tool_response(
        &mut self,
        responses: Vec<FunctionResponse>,
    ) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_message(ClientMessage::tool_response(responses))
            .await
    }

    fn on_event(&mut self, callback: LiveEventCallback) -> RealtimeResult<()> {
        // Register synchronously when possible so no early event is missed
        if let Ok(mut guard) = self.event_callback.try_lock() {
            *guard = Some(callback);
        } else {
            let cb = self.event_callback.clone();
            tokio::spawn(async move {
                *cb.lock().await = Some(callback);
            });
        }
        Ok(())
    }

    fn on_error(&mut self, callback: RealtimeErrorCallback) -> RealtimeResult<()> {
        if let Ok(mut guard) = self.error_callback.try_lock() {
            *guard = Some(callback);
        } else {
            let cb = self.error_callback.clone();
            tokio::spawn(async move {
                *cb.lock().await = Some(callback);
            });
        }
        Ok(())
    }

    fn get_provider_info(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": "gemini",
            "api_type": "WebSocket Live",
            "endpoint": GEMINI_LIVE_URL,
            "model": self.model(),
            "supported_voices": [
                "Puck", "Charon", "Kore", "Fenrir", "Aoede", "Leda", "Orus", "Zephyr"
            ],
            "input_sample_rate": GEMINI_INPUT_SAMPLE_RATE,
            "output_sample_rate": GEMINI_OUTPUT_SAMPLE_RATE,
            "features": {
                "bidirectional_audio": true,
                "video_frames": true,
                "function_calling": true,
                "transcription": true,
                "interruption": true
            },
            "documentation": "https://ai.google.dev/gemini-api/docs/live"
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
