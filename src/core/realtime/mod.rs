//! Live multimodal model providers.
//!
//! # Supported Providers
//!
//! - **Gemini Live API** - full duplex audio with transcription and tools
//!
//! # Architecture
//!
//! - `BaseRealtime` trait for provider abstraction
//! - Factory functions for provider creation by name
//! - A single ordered event callback per connection
//!
//! # Example
//!
//! ```rust,ignore
//! use duplex_gateway::core::realtime::{create_realtime_provider, RealtimeConfig};
//! use std::sync::Arc;
//!
//! let config = RealtimeConfig {
//!     api_key: "...".to_string(),
//!     ..Default::default()
//! };
//!
//! let mut provider = create_realtime_provider("gemini", config)?;
//! provider.on_event(Arc::new(|event| Box::pin(async move {
//!     println!("{event:?}");
//! })))?;
//! provider.connect().await?;
//! ```

mod base;
pub mod gemini;

pub use base::{
    BaseRealtime, BoxedRealtime, ConnectionState, FunctionCall, FunctionDeclaration,
    FunctionResponse, LiveEvent, LiveEventCallback, RealtimeConfig, RealtimeError,
    RealtimeErrorCallback, RealtimeResult,
};
pub use gemini::{DEFAULT_GEMINI_MODEL, GEMINI_LIVE_URL, GeminiLive, GeminiVoice};

/// Supported live providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeProvider {
    /// Google Gemini Live API
    Gemini,
}

impl RealtimeProvider {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" | "gemini-live" | "gemini_live" | "google" => Some(RealtimeProvider::Gemini),
            _ => None,
        }
    }
}

impl std::fmt::Display for RealtimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeProvider::Gemini => write!(f, "gemini"),
        }
    }
}

/// Factory function to create a live provider by name.
pub fn create_realtime_provider(
    provider_type: &str,
    config: RealtimeConfig,
) -> RealtimeResult<BoxedRealtime> {
    match RealtimeProvider::parse(provider_type) {
        Some(provider) => create_realtime_provider_from_enum(provider, config),
        None => Err(RealtimeError::InvalidConfiguration(format!(
            "Unsupported realtime provider '{provider_type}'. Supported providers: {}",
            get_supported_realtime_providers().join(", ")
        ))),
    }
}

/// Create a live provider from enum.
pub fn create_realtime_provider_from_enum(
    provider: RealtimeProvider,
    config: RealtimeConfig,
) -> RealtimeResult<BoxedRealtime> {
    match provider {
        RealtimeProvider::Gemini => Ok(Box::new(GeminiLive::new(config)?)),
    }
}

/// Get list of supported live providers.
pub fn get_supported_realtime_providers() -> Vec<&'static str> {
    vec!["gemini"]
}
