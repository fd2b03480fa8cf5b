//! Configuration module for the duplex gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use duplex_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use merge::{
    DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_PORT, DEFAULT_TOOL_TIMEOUT_MS,
};

use crate::core::realtime::{FunctionDeclaration, RealtimeConfig};

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Groups:
/// - Listener (host, port, TLS)
/// - Upstream model settings
/// - Per-session limits
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Upstream model
    /// Gemini API key (GEMINI_API_KEY, falling back to API_KEY)
    pub gemini_api_key: String,
    /// Model id, with or without the `models/` prefix
    pub gemini_model: String,
    /// Live endpoint override; the public endpoint is used when unset
    pub gemini_live_url: Option<String>,
    /// Prebuilt voice name
    pub gemini_voice: Option<String>,
    /// System instruction sent with every session setup
    pub system_instruction: Option<String>,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,

    // Session limits
    /// Close connections without client traffic for this many seconds
    /// Default: 300
    pub idle_timeout_seconds: u64,
    /// Upper bound on a single tool execution in milliseconds
    /// Default: 5000
    pub tool_timeout_ms: u64,
}

/// Zeroize the upstream key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.gemini_api_key.zeroize();
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The .env file is loaded in main.rs at application startup, so its values
    /// are visible here as ordinary environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_api_key(&self.gemini_api_key)?;
        validation::validate_limits(
            self.rate_limit_requests_per_second,
            self.max_connections_per_ip,
            self.idle_timeout_seconds,
            self.tool_timeout_ms,
        )?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Upstream session settings for one client session.
    ///
    /// Both transcription directions are always requested; turn tracking
    /// depends on them.
    pub fn realtime_config(&self, tools: Vec<FunctionDeclaration>) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.gemini_api_key.clone(),
            model: self.gemini_model.clone(),
            url: self.gemini_live_url.clone(),
            voice: self.gemini_voice.clone(),
            system_instruction: self.system_instruction.clone(),
            input_transcription: true,
            output_transcription: true,
            tools,
        }
    }
}
