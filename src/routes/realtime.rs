//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::realtime_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /realtime` - WebSocket upgrade, one upstream session at a time
///
/// # Example
///
/// ```json
/// // Client sends
/// {"type": "start-session"}
///
/// // Server responds once the upstream setup completes
/// {"type": "session-started"}
///
/// // Client streams microphone audio
/// {"type": "audio-data", "payload": {"data": "<base64>", "mimeType": "audio/pcm;rate=16000"}}
///
/// // Server streams transcripts and model audio
/// {"type": "gemini-transcription", "text": "It is noon"}
/// {"type": "audio-data", "data": "<base64>"}
/// ```
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(realtime_handler))
        .layer(TraceLayer::new_for_http())
}
