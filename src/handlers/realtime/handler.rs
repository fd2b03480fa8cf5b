//! Relay WebSocket handler
//!
//! One task per client connection owns everything that belongs to that
//! connection: the optional upstream [`RelaySession`], the idle timer and the
//! registry entry. Outgoing messages go through a single sender task so the
//! client sees them in the order they were produced.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::select;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::realtime::{RealtimeProvider, create_realtime_provider_from_enum};
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::messages::{RealtimeIncomingMessage, RealtimeMessageRoute, RealtimeOutgoingMessage};
use super::session::{RelaySession, SessionFlow, SessionSignal};

/// Channel buffer between the handler and the sender task
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound on how often the idle check runs
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long queued messages get to reach the client before the socket closes
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection and binds it to at most one upstream Gemini
/// Live session at a time.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let peer = client_ip.map(|Extension(ClientIp(ip))| ip);
    info!(peer = ?peer, "Relay WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_realtime_socket(socket, state, peer))
}

/// Per-connection state shared by the message handlers.
struct Connection {
    id: Uuid,
    state: Arc<AppState>,
    out: mpsc::Sender<RealtimeMessageRoute>,
    session: Option<RelaySession>,
}

impl Connection {
    async fn send(&self, message: RealtimeOutgoingMessage) {
        if self
            .out
            .send(RealtimeMessageRoute::Outgoing(message))
            .await
            .is_err()
        {
            debug!(connection_id = %self.id, "Sender task gone, dropping message");
        }
    }

    async fn start_session(&mut self) {
        if self.session.is_some() {
            warn!(connection_id = %self.id, "start-session while a session is active");
            self.send(RealtimeOutgoingMessage::error("Session already active"))
                .await;
            return;
        }

        info!(connection_id = %self.id, "Starting upstream session");

        let config = &self.state.config;
        let realtime_config = config.realtime_config(self.state.tools.declarations());
        let upstream =
            match create_realtime_provider_from_enum(RealtimeProvider::Gemini, realtime_config) {
                Ok(upstream) => upstream,
                Err(e) => {
                    error!(connection_id = %self.id, error = %e, "Failed to create upstream client");
                    self.send(RealtimeOutgoingMessage::error(e.to_string())).await;
                    return;
                }
            };

        match RelaySession::start(upstream, self.state.tools.clone(), config.tool_timeout()).await
        {
            Ok(session) => {
                self.session = Some(session);
                self.state.mark_session_active(&self.id, true);
            }
            Err(e) => {
                error!(connection_id = %self.id, error = %e, "Failed to start session");
                self.send(RealtimeOutgoingMessage::error(format!(
                    "Failed to start session: {e}"
                )))
                .await;
            }
        }
    }

    /// Close the upstream session, if any. The transport stays open.
    async fn end_session(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        session.close().await;
        self.state.mark_session_active(&self.id, false);
        true
    }

    /// Handle one typed client message. Returns false to close the socket.
    async fn handle_incoming(&mut self, msg: RealtimeIncomingMessage) -> bool {
        match msg {
            RealtimeIncomingMessage::StartSession => self.start_session().await,
            RealtimeIncomingMessage::StopSession => {
                if self.end_session().await {
                    info!(connection_id = %self.id, "Session stopped by client");
                    self.send(RealtimeOutgoingMessage::SessionClosed).await;
                }
            }
            RealtimeIncomingMessage::AudioData { payload }
            | RealtimeIncomingMessage::VideoFrame { payload } => {
                let Some(session) = self.session.as_mut() else {
                    debug!(connection_id = %self.id, "No active session, dropping media");
                    return true;
                };
                if let Err(e) = session.send_media(payload).await {
                    warn!(connection_id = %self.id, error = %e, "Failed to forward media");
                    self.send(RealtimeOutgoingMessage::error(e.to_string())).await;
                    return false;
                }
            }
            RealtimeIncomingMessage::TextInput { payload } => {
                let Some(session) = self.session.as_mut() else {
                    debug!(connection_id = %self.id, "No active session, dropping text input");
                    return true;
                };
                debug!(connection_id = %self.id, len = payload.len(), "Forwarding text input");
                if let Err(e) = session.send_text(&payload).await {
                    warn!(connection_id = %self.id, error = %e, "Failed to forward text");
                    self.send(RealtimeOutgoingMessage::error(e.to_string())).await;
                    return false;
                }
            }
        }
        true
    }

    /// Apply an upstream signal. Returns false to close the socket.
    async fn handle_session_signal(&mut self, signal: SessionSignal) -> bool {
        let Some(session) = self.session.as_mut() else {
            return true;
        };

        match session.handle_signal(signal, &self.out).await {
            SessionFlow::Continue => true,
            SessionFlow::Closed => {
                self.end_session().await;
                self.send(RealtimeOutgoingMessage::SessionClosed).await;
                false
            }
            SessionFlow::Failed => {
                self.end_session().await;
                false
            }
        }
    }
}

/// Next signal of the active session; never resolves without one.
async fn next_session_signal(session: &mut Option<RelaySession>) -> SessionSignal {
    match session {
        Some(session) => session.next_signal().await,
        None => std::future::pending().await,
    }
}

/// Handle the relay WebSocket connection
async fn handle_realtime_socket(socket: WebSocket, state: Arc<AppState>, peer: Option<IpAddr>) {
    let id = Uuid::new_v4();
    let cancel = state.register_session(id, peer);
    info!(connection_id = %id, peer = ?peer, "Relay WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<RealtimeMessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                RealtimeMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                RealtimeMessageRoute::Close => {
                    debug!("Closing relay WebSocket connection");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let mut conn = Connection {
        id,
        state: state.clone(),
        out: message_tx,
        session: None,
    };

    let idle_timeout = state.config.idle_timeout();
    let check_interval = idle_timeout.min(IDLE_CHECK_INTERVAL);
    let mut last_activity = Instant::now();
    let mut idle_check = interval_at(Instant::now() + check_interval, check_interval);
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_client_message(msg, &mut conn).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %id, "Relay WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(connection_id = %id, "Relay WebSocket closed by client");
                        break;
                    }
                }
            }
            signal = next_session_signal(&mut conn.session) => {
                if !conn.handle_session_signal(signal).await {
                    break;
                }
            }
            _ = cancel.cancelled() => {
                info!(connection_id = %id, "Server shutting down, closing connection");
                break;
            }
            _ = idle_check.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    warn!(
                        connection_id = %id,
                        idle_secs = last_activity.elapsed().as_secs(),
                        "Closing idle relay connection"
                    );
                    conn.send(RealtimeOutgoingMessage::error(
                        "Connection closed due to inactivity",
                    ))
                    .await;
                    break;
                }
            }
        }
    }

    // Cleanup
    conn.end_session().await;
    let _ = conn.out.send(RealtimeMessageRoute::Close).await;
    drop(conn);

    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
    }

    state.unregister_session(&id);
    if let Some(ip) = peer {
        state.release_connection(ip);
    }

    info!(connection_id = %id, "Relay WebSocket connection terminated");
}

/// Process one raw WebSocket message. Returns false to close the socket.
async fn process_client_message(msg: Message, conn: &mut Connection) -> bool {
    match msg {
        Message::Text(text) => {
            let incoming: RealtimeIncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(connection_id = %conn.id, "Failed to parse relay message: {}", e);
                    conn.send(RealtimeOutgoingMessage::error(format!(
                        "Invalid message format: {e}"
                    )))
                    .await;
                    return true;
                }
            };

            if let Err(e) = incoming.validate_size() {
                warn!(connection_id = %conn.id, "Message validation failed: {}", e);
                conn.send(RealtimeOutgoingMessage::error(e.to_string())).await;
                return true;
            }

            conn.handle_incoming(incoming).await
        }
        Message::Binary(data) => {
            debug!(connection_id = %conn.id, len = data.len(), "Ignoring binary frame");
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!(connection_id = %conn.id, "Relay WebSocket close received");
            false
        }
    }
}
