use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use super::{ClientError, ClientObserver, ClientStatus};
use crate::core::media::codec::pcm_mime_type;
use crate::core::media::{
    AudioSink, CaptureControl, Completion, MediaBlob, OutboundMedia, OutputClock,
    PLAYBACK_SAMPLE_RATE, PlaybackScheduler, SegmentId,
};
use crate::core::turn::{Turn, TurnPhase};
use crate::handlers::realtime::messages::{RealtimeIncomingMessage, RealtimeOutgoingMessage};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Request from the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Text(String),
    ToggleMute,
    /// The video sampler lost camera access.
    CameraUnavailable,
    Stop,
}

/// Cloneable remote control for a running [`ClientSession`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
    control: CaptureControl,
}

impl ClientHandle {
    /// Gates shared with the capture pipeline and video sampler.
    pub fn control(&self) -> &CaptureControl {
        &self.control
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        self.command(ClientCommand::Text(text.into())).await;
    }

    pub async fn toggle_mute(&self) {
        self.command(ClientCommand::ToggleMute).await;
    }

    pub async fn camera_unavailable(&self) {
        self.command(ClientCommand::CameraUnavailable).await;
    }

    pub async fn stop(&self) {
        self.command(ClientCommand::Stop).await;
    }

    async fn command(&self, command: ClientCommand) {
        if self.commands.send(command).await.is_err() {
            debug!("Client session already finished");
        }
    }
}

/// What the transport loop should do after a server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFlow {
    Continue,
    /// The server closed the session.
    Stop,
    /// The server reported an error.
    Failed(String),
}

/// Client side of one conversation.
pub struct ClientSession<S, C> {
    scheduler: PlaybackScheduler<S, C>,
    phase: TurnPhase,
    control: CaptureControl,
    observer: Arc<dyn ClientObserver>,
    status: ClientStatus,
    commands: mpsc::Receiver<ClientCommand>,
}

impl<S: AudioSink, C: OutputClock> ClientSession<S, C> {
    /// Create a session playing out on `sink`, timed by `clock`.
    pub fn new(
        sink: S,
        clock: C,
        control: CaptureControl,
        observer: Arc<dyn ClientObserver>,
    ) -> (Self, ClientHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = ClientHandle {
            commands: commands_tx,
            control: control.clone(),
        };
        let session = Self {
            scheduler: PlaybackScheduler::new(sink, clock),
            phase: TurnPhase::Idle,
            control,
            observer,
            status: ClientStatus::Disconnected,
            commands,
        };
        (session, handle)
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn status(&self) -> &ClientStatus {
        &self.status
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<S, C> {
        &self.scheduler
    }

    fn set_status(&mut self, status: ClientStatus) {
        if self.status != status {
            self.observer.on_status(&status);
            self.status = status;
        }
    }

    fn listening(&mut self) {
        let status = if self.control.is_muted() {
            ClientStatus::Muted
        } else {
            ClientStatus::Listening
        };
        self.set_status(status);
    }

    /// Apply one message from the relay.
    pub fn handle_server_message(&mut self, msg: RealtimeOutgoingMessage) -> ClientFlow {
        match msg {
            RealtimeOutgoingMessage::SessionStarted => {
                info!("Session started");
                self.control.set_active(true);
                self.listening();
            }
            RealtimeOutgoingMessage::UserTranscription { text } => {
                self.observer.on_user_transcript(&text);
            }
            RealtimeOutgoingMessage::GeminiTranscription { text } => {
                self.phase = TurnPhase::ModelSpeaking;
                self.set_status(ClientStatus::ModelSpeaking);
                self.observer.on_model_transcript(&text);
            }
            RealtimeOutgoingMessage::AudioData { data } => self.play(data),
            RealtimeOutgoingMessage::Interrupted => {
                let flushed = self.scheduler.flush_all();
                debug!(flushed, "Model interrupted, playback flushed");
                self.phase = TurnPhase::Idle;
                self.observer.on_interrupted();
                self.listening();
            }
            RealtimeOutgoingMessage::TurnComplete {
                final_user_text,
                final_model_text,
            } => {
                self.phase = TurnPhase::Idle;
                self.observer.on_turn_complete(&Turn {
                    user_text: final_user_text,
                    model_text: final_model_text,
                });
                self.listening();
            }
            RealtimeOutgoingMessage::ToolCall {
                tool_name,
                tool_args,
                tool_result,
            } => {
                self.observer
                    .on_tool_call(&tool_name, &tool_args, &tool_result);
            }
            RealtimeOutgoingMessage::Error { message } => {
                warn!(message = %message, "Error from server");
                self.set_status(ClientStatus::Error(message.clone()));
                return ClientFlow::Failed(message);
            }
            RealtimeOutgoingMessage::SessionClosed => {
                info!("Session closed by server");
                return ClientFlow::Stop;
            }
        }
        ClientFlow::Continue
    }

    fn play(&mut self, data: String) {
        if data.is_empty() {
            return;
        }

        let blob = MediaBlob {
            data,
            mime_type: pcm_mime_type(PLAYBACK_SAMPLE_RATE),
        };
        let buffer = match blob.decode_pcm(PLAYBACK_SAMPLE_RATE, 1) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable audio chunk");
                return;
            }
        };

        if let Err(e) = self.scheduler.enqueue(buffer) {
            warn!(error = %e, "Failed to schedule audio chunk");
        }
    }

    /// Natural completion of a playback segment.
    pub fn on_segment_complete(&mut self, id: SegmentId) {
        if self.scheduler.complete(id) == Completion::Drained
            && self.phase == TurnPhase::ModelSpeaking
        {
            self.phase = TurnPhase::Idle;
            self.listening();
        }
    }

    /// Flip the microphone mute. Returns the new muted state.
    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.control.toggle_mute();
        if muted {
            self.set_status(ClientStatus::Muted);
        } else if self.control.is_active() {
            self.listening();
        }
        muted
    }

    pub fn camera_unavailable(&mut self) {
        self.control.set_camera(false);
        self.set_status(ClientStatus::CameraUnavailable);
    }

    /// Message for typed input, if there is anything to send.
    pub fn text_input(text: &str) -> Option<RealtimeIncomingMessage> {
        let text = text.trim();
        (!text.is_empty()).then(|| RealtimeIncomingMessage::TextInput {
            payload: text.to_string(),
        })
    }

    /// Local teardown: capture off, playback silenced.
    pub fn stop(&mut self) {
        self.control.set_active(false);
        self.control.set_muted(false);
        self.control.set_camera(false);
        self.scheduler.reset();
        self.phase = TurnPhase::Idle;
        if !matches!(self.status, ClientStatus::Error(_)) {
            self.set_status(ClientStatus::Disconnected);
        }
    }

    /// Connect to the relay at `url` and run until the session ends.
    ///
    /// `media` carries captured audio and video; `completions` carries
    /// natural segment completions from the output device.
    pub async fn run(
        mut self,
        url: &str,
        mut media: mpsc::Receiver<OutboundMedia>,
        mut completions: mpsc::UnboundedReceiver<SegmentId>,
    ) -> Result<(), ClientError> {
        self.set_status(ClientStatus::Connecting);

        let (ws_stream, _response) = match tokio_tungstenite::connect_async(url).await {
            Ok(connected) => connected,
            Err(e) => {
                self.set_status(ClientStatus::Error("Connection error".to_string()));
                return Err(ClientError::Connection(e.to_string()));
            }
        };
        info!(url = %url, "Connected to relay");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        send_json(&mut ws_sink, &RealtimeIncomingMessage::StartSession).await?;

        let result = loop {
            tokio::select! {
                frame = ws_stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let msg = match serde_json::from_str::<RealtimeOutgoingMessage>(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(error = %e, "Ignoring unrecognized server message");
                                continue;
                            }
                        };
                        match self.handle_server_message(msg) {
                            ClientFlow::Continue => {}
                            ClientFlow::Stop => break Ok(()),
                            ClientFlow::Failed(message) => break Err(ClientError::Server(message)),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Relay connection closed");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.set_status(ClientStatus::Error("Connection error".to_string()));
                        break Err(ClientError::Transport(e.to_string()));
                    }
                },
                Some(outbound) = media.recv() => {
                    if let Err(e) = send_json(&mut ws_sink, &RealtimeIncomingMessage::from(outbound)).await {
                        break Err(e);
                    }
                }
                Some(id) = completions.recv() => self.on_segment_complete(id),
                command = self.commands.recv() => match command {
                    Some(ClientCommand::Text(text)) => {
                        if let Some(msg) = Self::text_input(&text)
                            && let Err(e) = send_json(&mut ws_sink, &msg).await
                        {
                            break Err(e);
                        }
                    }
                    Some(ClientCommand::ToggleMute) => {
                        self.toggle_mute();
                    }
                    Some(ClientCommand::CameraUnavailable) => self.camera_unavailable(),
                    Some(ClientCommand::Stop) | None => break Ok(()),
                },
            }
        };

        self.stop();
        if let Err(e) = send_json(&mut ws_sink, &RealtimeIncomingMessage::StopSession).await {
            debug!(error = %e, "Could not send stop-session");
        }
        let _ = ws_sink.close().await;

        result
    }
}

async fn send_json<W>(sink: &mut W, msg: &RealtimeIncomingMessage) -> Result<(), ClientError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json =
        serde_json::to_string(msg).map_err(|e| ClientError::Protocol(e.to_string()))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::ManualClock;
    use crate::core::media::playback::tests::RecordingSink;
    use base64::{Engine, engine::general_purpose::STANDARD};
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl ClientObserver for Recorder {
        fn on_status(&self, status: &ClientStatus) {
            self.events.lock().push(format!("status:{status}"));
        }
        fn on_user_transcript(&self, text: &str) {
            self.events.lock().push(format!("user:{text}"));
        }
        fn on_model_transcript(&self, text: &str) {
            self.events.lock().push(format!("model:{text}"));
        }
        fn on_turn_complete(&self, turn: &Turn) {
            self.events
                .lock()
                .push(format!("turn:{}|{}", turn.user_text, turn.model_text));
        }
        fn on_interrupted(&self) {
            self.events.lock().push("interrupted".to_string());
        }
        fn on_tool_call(&self, name: &str, _args: &Value, result: &str) {
            self.events.lock().push(format!("tool:{name}={result}"));
        }
    }

    type TestSession = ClientSession<RecordingSink, ManualClock>;

    fn session() -> (TestSession, ClientHandle, ManualClock, Arc<Recorder>) {
        let clock = ManualClock::new();
        let recorder = Arc::new(Recorder::default());
        let (session, handle) = ClientSession::new(
            RecordingSink::default(),
            clock.clone(),
            CaptureControl::new(),
            recorder.clone(),
        );
        (session, handle, clock, recorder)
    }

    /// Base64 PCM of `ms` milliseconds of silence at 24 kHz.
    fn audio_ms(ms: usize) -> String {
        STANDARD.encode(vec![0u8; 24 * ms * 2])
    }

    #[test]
    fn test_session_started_activates_capture() {
        let (mut session, handle, _clock, recorder) = session();

        assert_eq!(
            session.handle_server_message(RealtimeOutgoingMessage::SessionStarted),
            ClientFlow::Continue
        );
        assert!(handle.control().is_active());
        assert_eq!(session.status(), &ClientStatus::Listening);
        assert_eq!(recorder.take(), vec!["status:Listening..."]);
    }

    #[test]
    fn test_audio_is_scheduled_back_to_back() {
        let (mut session, _handle, clock, _recorder) = session();
        clock.set(Duration::from_millis(500));

        for _ in 0..3 {
            session.handle_server_message(RealtimeOutgoingMessage::AudioData {
                data: audio_ms(40),
            });
        }

        let starts: Vec<_> = session
            .scheduler()
            .sink()
            .started
            .iter()
            .map(|(_, at, _)| at.as_millis())
            .collect();
        assert_eq!(starts, vec![500, 540, 580]);
        assert_eq!(session.scheduler().cursor(), Duration::from_millis(620));
    }

    #[test]
    fn test_malformed_audio_is_dropped() {
        let (mut session, _handle, _clock, _recorder) = session();

        let flow = session.handle_server_message(RealtimeOutgoingMessage::AudioData {
            data: "not base64!".to_string(),
        });

        assert_eq!(flow, ClientFlow::Continue);
        assert_eq!(session.scheduler().scheduled_count(), 0);
    }

    #[test]
    fn test_drain_ends_model_speaking() {
        let (mut session, _handle, _clock, recorder) = session();
        session.handle_server_message(RealtimeOutgoingMessage::SessionStarted);
        session.handle_server_message(RealtimeOutgoingMessage::GeminiTranscription {
            text: "Hello".to_string(),
        });
        session.handle_server_message(RealtimeOutgoingMessage::AudioData {
            data: audio_ms(20),
        });
        session.handle_server_message(RealtimeOutgoingMessage::AudioData {
            data: audio_ms(20),
        });
        assert_eq!(session.phase(), TurnPhase::ModelSpeaking);
        recorder.take();

        session.on_segment_complete(SegmentId(0));
        assert_eq!(session.phase(), TurnPhase::ModelSpeaking);

        session.on_segment_complete(SegmentId(1));
        assert_eq!(session.phase(), TurnPhase::Idle);
        assert_eq!(recorder.take(), vec!["status:Listening..."]);
    }

    #[test]
    fn test_interruption_flushes_playback() {
        let (mut session, _handle, clock, recorder) = session();
        session.handle_server_message(RealtimeOutgoingMessage::GeminiTranscription {
            text: "Once upon".to_string(),
        });
        for _ in 0..2 {
            session.handle_server_message(RealtimeOutgoingMessage::AudioData {
                data: audio_ms(100),
            });
        }
        clock.set(Duration::from_millis(30));

        session.handle_server_message(RealtimeOutgoingMessage::Interrupted);

        assert_eq!(session.phase(), TurnPhase::Idle);
        assert!(session.scheduler().is_idle());
        assert_eq!(session.scheduler().sink().stopped.len(), 2);
        assert_eq!(session.scheduler().cursor(), Duration::from_millis(30));
        assert!(recorder.take().contains(&"interrupted".to_string()));

        // Late completion of a flushed segment changes nothing
        session.on_segment_complete(SegmentId(0));
        assert_eq!(session.phase(), TurnPhase::Idle);
    }

    #[test]
    fn test_turn_complete_and_tool_call_reach_observer() {
        let (mut session, _handle, _clock, recorder) = session();

        session.handle_server_message(RealtimeOutgoingMessage::ToolCall {
            tool_name: "getCurrentTime".to_string(),
            tool_args: json!({"timezone": "UTC"}),
            tool_result: "noon".to_string(),
        });
        session.handle_server_message(RealtimeOutgoingMessage::TurnComplete {
            final_user_text: "time?".to_string(),
            final_model_text: "noon".to_string(),
        });

        assert_eq!(
            recorder.take(),
            vec![
                "tool:getCurrentTime=noon",
                "turn:time?|noon",
                "status:Listening...",
            ]
        );
    }

    #[test]
    fn test_server_error_fails_and_keeps_status() {
        let (mut session, handle, _clock, _recorder) = session();
        session.handle_server_message(RealtimeOutgoingMessage::SessionStarted);

        let flow = session.handle_server_message(RealtimeOutgoingMessage::error("quota"));
        assert_eq!(flow, ClientFlow::Failed("quota".to_string()));

        session.stop();
        assert!(!handle.control().is_active());
        assert_eq!(session.status(), &ClientStatus::Error("quota".to_string()));
    }

    #[test]
    fn test_session_closed_stops() {
        let (mut session, _handle, _clock, _recorder) = session();
        assert_eq!(
            session.handle_server_message(RealtimeOutgoingMessage::SessionClosed),
            ClientFlow::Stop
        );
    }

    #[test]
    fn test_mute_changes_listening_status() {
        let (mut session, _handle, _clock, _recorder) = session();
        session.handle_server_message(RealtimeOutgoingMessage::SessionStarted);

        assert!(session.toggle_mute());
        assert_eq!(session.status(), &ClientStatus::Muted);

        session.handle_server_message(RealtimeOutgoingMessage::Interrupted);
        assert_eq!(session.status(), &ClientStatus::Muted);

        assert!(!session.toggle_mute());
        assert_eq!(session.status(), &ClientStatus::Listening);
    }

    #[test]
    fn test_text_input_is_trimmed() {
        assert_eq!(TestSession::text_input("   "), None);
        assert_eq!(
            TestSession::text_input("  hi there \n"),
            Some(RealtimeIncomingMessage::TextInput {
                payload: "hi there".to_string()
            })
        );
    }

    #[test]
    fn test_camera_unavailable() {
        let (mut session, handle, _clock, _recorder) = session();
        handle.control().set_camera(true);

        session.camera_unavailable();

        assert!(!handle.control().is_camera_on());
        assert_eq!(session.status(), &ClientStatus::CameraUnavailable);
    }
}
