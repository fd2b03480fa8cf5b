//! Relay WebSocket handlers
//!
//! Binds one client connection to at most one upstream Gemini Live session.
//! All frames are JSON text tagged by `type`; media is base64 inside the
//! payload.
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **start-session**: open the upstream session
//! - **stop-session**: close the upstream session, keep the socket
//! - **audio-data**: `{ payload: { data, mimeType } }`, 16 kHz PCM
//! - **video-frame**: `{ payload: { data, mimeType } }`, JPEG
//! - **text-input**: `{ payload: "<text>" }`
//!
//! ## Server → Client
//!
//! - **session-started** / **session-closed**
//! - **user-transcription** / **gemini-transcription**: accumulated text of
//!   the current turn
//! - **turn-complete**: `{ finalUserText, finalModelText }`, not sent for a
//!   turn that was interrupted
//! - **tool-call**: `{ toolName, toolArgs, toolResult }`
//! - **audio-data**: `{ data }`, 24 kHz PCM
//! - **interrupted**: flush playback
//! - **error**: `{ message }`

mod handler;
pub mod messages;
mod session;

pub use handler::realtime_handler;
