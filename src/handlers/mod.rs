//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `realtime` - Relay WebSocket to Gemini Live

pub mod api;
pub mod realtime;

pub use realtime::realtime_handler;
