//! Upstream session owned by one relay connection.
//!
//! The upstream client pushes events into a bounded channel from its own
//! connection task; the relay handler drains that channel together with the
//! tool outcome channel, so all per-session state (transcripts, turn phase,
//! pending tool calls) is mutated from the handler task alone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::media::MediaBlob;
use crate::core::realtime::{
    BoxedRealtime, FunctionCall, FunctionResponse, LiveEvent, RealtimeError, RealtimeResult,
};
use crate::core::tools::{ToolError, ToolOutcome, ToolRegistry, ToolRelay};
use crate::core::turn::{TurnError, TurnEvent, TurnOutput, TurnStateMachine};

use super::messages::{RealtimeMessageRoute, RealtimeOutgoingMessage};

/// Capacity of the upstream event channel
const UPSTREAM_CHANNEL_CAPACITY: usize = 256;

/// Something the upstream side produced.
#[derive(Debug)]
pub(crate) enum UpstreamSignal {
    Event(LiveEvent),
    Error(RealtimeError),
}

/// Work item for the handler loop.
#[derive(Debug)]
pub(crate) enum SessionSignal {
    Upstream(UpstreamSignal),
    Tool(ToolOutcome),
    /// Both channels closed; the upstream client is gone.
    Detached,
}

/// What the handler should do after a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionFlow {
    Continue,
    /// Upstream closed: tell the client `session-closed`, then close the socket.
    Closed,
    /// Upstream failed: an `error` was already sent, close the socket.
    Failed,
}

pub(crate) struct RelaySession {
    upstream: BoxedRealtime,
    turns: TurnStateMachine,
    tools: ToolRelay,
    signals: mpsc::Receiver<UpstreamSignal>,
    outcomes: mpsc::Receiver<ToolOutcome>,
    started: bool,
}

impl RelaySession {
    /// Wire callbacks into `upstream` and connect it.
    pub async fn start(
        mut upstream: BoxedRealtime,
        registry: Arc<ToolRegistry>,
        tool_timeout: Duration,
    ) -> RealtimeResult<Self> {
        let (signal_tx, signals) = mpsc::channel(UPSTREAM_CHANNEL_CAPACITY);

        let event_tx = signal_tx.clone();
        upstream.on_event(Arc::new(move |event: LiveEvent| {
            let tx = event_tx.clone();
            Box::pin(async move {
                let _ = tx.send(UpstreamSignal::Event(event)).await;
            })
        }))?;

        let error_tx = signal_tx;
        upstream.on_error(Arc::new(move |error: RealtimeError| {
            let tx = error_tx.clone();
            Box::pin(async move {
                let _ = tx.send(UpstreamSignal::Error(error)).await;
            })
        }))?;

        upstream.connect().await?;

        let (tools, outcomes) = ToolRelay::new(registry, tool_timeout);

        Ok(Self {
            upstream,
            turns: TurnStateMachine::new(),
            tools,
            signals,
            outcomes,
            started: false,
        })
    }

    /// Next upstream event or tool outcome. Cancel safe.
    pub async fn next_signal(&mut self) -> SessionSignal {
        tokio::select! {
            Some(signal) = self.signals.recv() => SessionSignal::Upstream(signal),
            Some(outcome) = self.outcomes.recv() => SessionSignal::Tool(outcome),
            else => SessionSignal::Detached,
        }
    }

    pub async fn send_media(&mut self, chunk: MediaBlob) -> RealtimeResult<()> {
        self.upstream.send_media(chunk).await
    }

    pub async fn send_text(&mut self, text: &str) -> RealtimeResult<()> {
        self.upstream.send_text(text).await
    }

    /// Apply one signal, queueing client messages on `out`.
    pub async fn handle_signal(
        &mut self,
        signal: SessionSignal,
        out: &mpsc::Sender<RealtimeMessageRoute>,
    ) -> SessionFlow {
        match signal {
            SessionSignal::Upstream(UpstreamSignal::Event(event)) => {
                self.handle_event(event, out).await
            }
            SessionSignal::Upstream(UpstreamSignal::Error(error)) => {
                warn!(error = %error, "Upstream connection error");
                send(out, RealtimeOutgoingMessage::error(error.to_string())).await;
                SessionFlow::Failed
            }
            SessionSignal::Tool(outcome) => {
                if let Err(e) = self.handle_outcome(outcome, out).await {
                    warn!(error = %e, "Failed to answer tool call");
                    send(out, RealtimeOutgoingMessage::error(e.to_string())).await;
                    return SessionFlow::Failed;
                }
                SessionFlow::Continue
            }
            SessionSignal::Detached => SessionFlow::Closed,
        }
    }

    async fn handle_event(
        &mut self,
        event: LiveEvent,
        out: &mpsc::Sender<RealtimeMessageRoute>,
    ) -> SessionFlow {
        match event {
            LiveEvent::SetupComplete => {
                if !self.started {
                    self.started = true;
                    info!("Upstream session ready");
                    send(out, RealtimeOutgoingMessage::SessionStarted).await;
                }
            }
            LiveEvent::InputTranscription(delta) => {
                self.advance(TurnEvent::InputTranscription(delta), out)
                    .await;
            }
            LiveEvent::OutputTranscription(delta) => {
                self.advance(TurnEvent::OutputTranscription(delta), out)
                    .await;
            }
            LiveEvent::Audio(blob) => {
                self.advance(TurnEvent::ModelAudio, out).await;
                send(out, RealtimeOutgoingMessage::AudioData { data: blob.data }).await;
            }
            LiveEvent::ModelText(text) => {
                debug!(len = text.len(), "Ignoring model text part");
            }
            LiveEvent::TurnComplete => {
                self.advance(TurnEvent::TurnComplete, out).await;
            }
            LiveEvent::Interrupted => {
                self.advance(TurnEvent::Interrupted, out).await;
            }
            LiveEvent::ToolCall(calls) => {
                for call in calls {
                    self.dispatch_tool(call);
                }
            }
            LiveEvent::ToolCallCancellation(ids) => {
                let cancelled = self.tools.cancel(&ids);
                debug!(requested = ids.len(), cancelled, "Tool call cancellation");
            }
            LiveEvent::GoAway { time_left } => {
                warn!(time_left = ?time_left, "Upstream announced it will close soon");
            }
            LiveEvent::Closed { reason } => {
                info!(reason = ?reason, "Upstream session closed");
                return SessionFlow::Closed;
            }
        }
        SessionFlow::Continue
    }

    async fn advance(&mut self, event: TurnEvent, out: &mpsc::Sender<RealtimeMessageRoute>) {
        let outputs = match self.turns.handle(event) {
            Ok(outputs) => outputs,
            Err(TurnError::Closed(event)) => {
                debug!(event = ?event, "Dropping event for closed session");
                return;
            }
        };

        for output in outputs {
            let message = match output {
                TurnOutput::UserTranscript(text) => {
                    RealtimeOutgoingMessage::UserTranscription { text }
                }
                TurnOutput::ModelTranscript(text) => {
                    RealtimeOutgoingMessage::GeminiTranscription { text }
                }
                TurnOutput::TurnComplete(turn) => RealtimeOutgoingMessage::TurnComplete {
                    final_user_text: turn.user_text,
                    final_model_text: turn.model_text,
                },
                TurnOutput::Interrupted => RealtimeOutgoingMessage::Interrupted,
                // Playback happens on the client
                TurnOutput::SpeakingEnded => continue,
            };
            send(out, message).await;
        }
    }

    fn dispatch_tool(&mut self, call: FunctionCall) {
        match self.tools.dispatch(call) {
            Ok(()) => {}
            Err(ToolError::Unrecognized(name)) => {
                debug!(tool = %name, "Ignoring call to unrecognized tool");
            }
            Err(e) => warn!(error = %e, "Tool call not dispatched"),
        }
    }

    /// Answer the model and notify the client, once per call id.
    async fn handle_outcome(
        &mut self,
        outcome: ToolOutcome,
        out: &mpsc::Sender<RealtimeMessageRoute>,
    ) -> RealtimeResult<()> {
        if !self.tools.settle(&outcome) {
            debug!(call_id = %outcome.call.id, "Discarding outcome of cancelled tool call");
            return Ok(());
        }

        let ToolOutcome { call, result } = outcome;
        let result = match result {
            Ok(text) => text,
            Err(ToolError::InvalidArguments(reason)) => {
                warn!(tool = %call.name, reason = %reason, "Tool call with invalid arguments");
                return Ok(());
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                format!("Error: {e}")
            }
        };

        info!(tool = %call.name, call_id = %call.id, "Tool call answered");
        self.upstream
            .send_tool_response(vec![FunctionResponse::with_result(
                call.id.clone(),
                call.name.clone(),
                &result,
            )])
            .await?;

        send(
            out,
            RealtimeOutgoingMessage::ToolCall {
                tool_name: call.name,
                tool_args: call.args,
                tool_result: result,
            },
        )
        .await;
        Ok(())
    }

    /// Tear the session down. Late upstream events are rejected afterwards.
    pub async fn close(mut self) {
        self.tools.cancel_all();
        self.turns.close();
        if let Err(e) = self.upstream.disconnect().await {
            warn!(error = %e, "Failed to disconnect upstream session");
        }
    }
}

async fn send(out: &mpsc::Sender<RealtimeMessageRoute>, message: RealtimeOutgoingMessage) {
    if out
        .send(RealtimeMessageRoute::Outgoing(message))
        .await
        .is_err()
    {
        debug!("Client sender closed, dropping message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::{
        BaseRealtime, ConnectionState, LiveEventCallback, RealtimeConfig, RealtimeErrorCallback,
    };
    use crate::core::tools::CURRENT_TIME_TOOL;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records everything sent upstream and lets the test inject events.
    #[derive(Default, Clone)]
    struct FakeUpstream {
        sent_text: Arc<Mutex<Vec<String>>>,
        sent_media: Arc<Mutex<Vec<MediaBlob>>>,
        tool_responses: Arc<Mutex<Vec<FunctionResponse>>>,
        disconnected: Arc<Mutex<bool>>,
        event_callback: Arc<Mutex<Option<LiveEventCallback>>>,
    }

    impl FakeUpstream {
        async fn emit(&self, event: LiveEvent) {
            let callback = self.event_callback.lock().clone();
            if let Some(cb) = callback {
                cb(event).await;
            }
        }
    }

    #[async_trait]
    impl BaseRealtime for FakeUpstream {
        fn new(_config: RealtimeConfig) -> RealtimeResult<Self> {
            Ok(Self::default())
        }

        async fn connect(&mut self) -> RealtimeResult<()> {
            Ok(())
        }

        async fn disconnect(&mut self) -> RealtimeResult<()> {
            *self.disconnected.lock() = true;
            Ok(())
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn get_connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        async fn send_media(&mut self, chunk: MediaBlob) -> RealtimeResult<()> {
            self.sent_media.lock().push(chunk);
            Ok(())
        }

        async fn send_text(&mut self, text: &str) -> RealtimeResult<()> {
            self.sent_text.lock().push(text.to_string());
            Ok(())
        }

        async fn send_tool_response(
            &mut self,
            responses: Vec<FunctionResponse>,
        ) -> RealtimeResult<()> {
            self.tool_responses.lock().extend(responses);
            Ok(())
        }

        fn on_event(&mut self, callback: LiveEventCallback) -> RealtimeResult<()> {
            *self.event_callback.lock() = Some(callback);
            Ok(())
        }

        fn on_error(&mut self, _callback: RealtimeErrorCallback) -> RealtimeResult<()> {
            Ok(())
        }

        fn get_provider_info(&self) -> serde_json::Value {
            json!({"provider": "fake"})
        }
    }

    async fn session() -> (
        RelaySession,
        FakeUpstream,
        mpsc::Sender<RealtimeMessageRoute>,
        mpsc::Receiver<RealtimeMessageRoute>,
    ) {
        let fake = FakeUpstream::default();
        let session = RelaySession::start(
            Box::new(fake.clone()),
            Arc::new(ToolRegistry::builtin()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let (tx, rx) = mpsc::channel(64);
        (session, fake, tx, rx)
    }

    /// Feed one upstream event through the session.
    async fn pump(
        session: &mut RelaySession,
        fake: &FakeUpstream,
        event: LiveEvent,
        out: &mpsc::Sender<RealtimeMessageRoute>,
    ) -> SessionFlow {
        fake.emit(event).await;
        let signal = session.next_signal().await;
        session.handle_signal(signal, out).await
    }

    fn drain(rx: &mut mpsc::Receiver<RealtimeMessageRoute>) -> Vec<RealtimeOutgoingMessage> {
        let mut messages = Vec::new();
        while let Ok(route) = rx.try_recv() {
            if let RealtimeMessageRoute::Outgoing(message) = route {
                messages.push(message);
            }
        }
        messages
    }

    #[tokio::test]
    async fn test_setup_complete_announced_once() {
        let (mut session, fake, tx, mut rx) = session().await;

        pump(&mut session, &fake, LiveEvent::SetupComplete, &tx).await;
        pump(&mut session, &fake, LiveEvent::SetupComplete, &tx).await;

        assert_eq!(drain(&mut rx), vec![RealtimeOutgoingMessage::SessionStarted]);
    }

    #[tokio::test]
    async fn test_transcripts_accumulate_until_turn_complete() {
        let (mut session, fake, tx, mut rx) = session().await;

        for event in [
            LiveEvent::InputTranscription("what ".to_string()),
            LiveEvent::InputTranscription("time".to_string()),
            LiveEvent::OutputTranscription("noon".to_string()),
            LiveEvent::TurnComplete,
        ] {
            assert_eq!(
                pump(&mut session, &fake, event, &tx).await,
                SessionFlow::Continue
            );
        }

        assert_eq!(
            drain(&mut rx),
            vec![
                RealtimeOutgoingMessage::UserTranscription {
                    text: "what ".to_string()
                },
                RealtimeOutgoingMessage::UserTranscription {
                    text: "what time".to_string()
                },
                RealtimeOutgoingMessage::GeminiTranscription {
                    text: "noon".to_string()
                },
                RealtimeOutgoingMessage::TurnComplete {
                    final_user_text: "what time".to_string(),
                    final_model_text: "noon".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_interruption_suppresses_turn_complete() {
        let (mut session, fake, tx, mut rx) = session().await;

        for event in [
            LiveEvent::OutputTranscription("hi".to_string()),
            LiveEvent::Interrupted,
            LiveEvent::TurnComplete,
        ] {
            pump(&mut session, &fake, event, &tx).await;
        }

        assert_eq!(
            drain(&mut rx),
            vec![
                RealtimeOutgoingMessage::GeminiTranscription {
                    text: "hi".to_string()
                },
                RealtimeOutgoingMessage::Interrupted,
            ]
        );

        // The next turn starts from clean buffers
        pump(
            &mut session,
            &fake,
            LiveEvent::OutputTranscription("again".to_string()),
            &tx,
        )
        .await;
        pump(&mut session, &fake, LiveEvent::TurnComplete, &tx).await;
        assert_eq!(
            drain(&mut rx).last(),
            Some(&RealtimeOutgoingMessage::TurnComplete {
                final_user_text: String::new(),
                final_model_text: "again".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_audio_forwarded_in_order() {
        let (mut session, fake, tx, mut rx) = session().await;

        for data in ["AAAA", "BBBB"] {
            pump(
                &mut session,
                &fake,
                LiveEvent::Audio(MediaBlob {
                    data: data.to_string(),
                    mime_type: "audio/pcm;rate=24000".to_string(),
                }),
                &tx,
            )
            .await;
        }

        assert_eq!(
            drain(&mut rx),
            vec![
                RealtimeOutgoingMessage::AudioData {
                    data: "AAAA".to_string()
                },
                RealtimeOutgoingMessage::AudioData {
                    data: "BBBB".to_string()
                },
            ]
        );
        assert!(session.turns.is_model_speaking());
    }

    #[tokio::test]
    async fn test_tool_call_answered_once() {
        let (mut session, fake, tx, mut rx) = session().await;

        pump(
            &mut session,
            &fake,
            LiveEvent::ToolCall(vec![FunctionCall {
                id: "call-1".to_string(),
                name: CURRENT_TIME_TOOL.to_string(),
                args: json!({"timezone": "Europe/Paris"}),
            }]),
            &tx,
        )
        .await;

        // The outcome arrives through the tool channel
        let signal = session.next_signal().await;
        assert!(matches!(signal, SessionSignal::Tool(_)));
        assert_eq!(
            session.handle_signal(signal, &tx).await,
            SessionFlow::Continue
        );

        let responses = fake.tool_responses.lock().clone();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, "call-1");
        assert_eq!(responses[0].name, "getCurrentTime");
        let result = responses[0].response["result"].as_str().unwrap().to_string();
        assert!(result.starts_with("The current time for the timezone Europe/Paris is"));

        match drain(&mut rx).as_slice() {
            [RealtimeOutgoingMessage::ToolCall {
                tool_name,
                tool_args,
                tool_result,
            }] => {
                assert_eq!(tool_name, "getCurrentTime");
                assert_eq!(tool_args["timezone"], "Europe/Paris");
                assert_eq!(tool_result, &result);
            }
            other => panic!("Expected one tool-call message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_ignored() {
        let (mut session, fake, tx, mut rx) = session().await;

        let flow = pump(
            &mut session,
            &fake,
            LiveEvent::ToolCall(vec![FunctionCall {
                id: "call-2".to_string(),
                name: "openDoor".to_string(),
                args: json!({}),
            }]),
            &tx,
        )
        .await;

        assert_eq!(flow, SessionFlow::Continue);
        assert_eq!(session.tools.pending(), 0);
        assert!(fake.tool_responses.lock().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_tool_arguments_get_no_response() {
        let (mut session, fake, tx, mut rx) = session().await;

        pump(
            &mut session,
            &fake,
            LiveEvent::ToolCall(vec![FunctionCall {
                id: "call-3".to_string(),
                name: CURRENT_TIME_TOOL.to_string(),
                args: json!({"timezone": 9}),
            }]),
            &tx,
        )
        .await;
        let signal = session.next_signal().await;
        session.handle_signal(signal, &tx).await;

        assert!(fake.tool_responses.lock().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_upstream_close_and_error() {
        let (mut session, fake, tx, mut rx) = session().await;

        assert_eq!(
            pump(
                &mut session,
                &fake,
                LiveEvent::Closed { reason: None },
                &tx
            )
            .await,
            SessionFlow::Closed
        );

        let flow = session
            .handle_signal(
                SessionSignal::Upstream(UpstreamSignal::Error(RealtimeError::WebSocketError(
                    "reset".to_string(),
                ))),
                &tx,
            )
            .await;
        assert_eq!(flow, SessionFlow::Failed);
        assert_eq!(
            drain(&mut rx),
            vec![RealtimeOutgoingMessage::error("WebSocket error: reset")]
        );
    }

    #[tokio::test]
    async fn test_media_and_text_forwarded() {
        let (mut session, fake, _tx, _rx) = session().await;

        session
            .send_media(MediaBlob {
                data: "AAAA".to_string(),
                mime_type: "audio/pcm;rate=16000".to_string(),
            })
            .await
            .unwrap();
        session.send_text("hello").await.unwrap();

        assert_eq!(fake.sent_media.lock().len(), 1);
        assert_eq!(fake.sent_text.lock().as_slice(), ["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_close_disconnects_upstream() {
        let (session, fake, _tx, _rx) = session().await;
        session.close().await;
        assert!(*fake.disconnected.lock());
    }
}
