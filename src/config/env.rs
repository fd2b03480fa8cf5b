//! Environment variable loading.
//!
//! Values here form the base layer of the configuration; YAML overrides them
//! in [`super::merge`]. Blank variables are treated as unset.

use std::str::FromStr;

/// Raw values read from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,

    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_live_url: Option<String>,
    pub gemini_voice: Option<String>,
    pub system_instruction: Option<String>,

    pub idle_timeout_seconds: Option<u64>,
    pub tool_timeout_ms: Option<u64>,

    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl EnvConfig {
    /// Read every supported variable.
    ///
    /// The API key is taken from `GEMINI_API_KEY`, falling back to `API_KEY`.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            host: env_string("HOST"),
            port: env_parse("PORT")?,
            tls_cert_path: env_string("TLS_CERT_PATH"),
            tls_key_path: env_string("TLS_KEY_PATH"),

            gemini_api_key: env_string("GEMINI_API_KEY").or_else(|| env_string("API_KEY")),
            gemini_model: env_string("GEMINI_MODEL"),
            gemini_live_url: env_string("GEMINI_LIVE_URL"),
            gemini_voice: env_string("GEMINI_VOICE"),
            system_instruction: env_string("SYSTEM_INSTRUCTION"),

            idle_timeout_seconds: env_parse("SESSION_IDLE_TIMEOUT_SECONDS")?,
            tool_timeout_ms: env_parse("TOOL_TIMEOUT_MS")?,

            cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")?,
            rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE")?,
            max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP")?,
        })
    }
}

/// Non-empty, trimmed value of `key`.
pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse `key` when it is set.
pub(crate) fn env_parse<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key}: '{raw}' ({e})").into()),
        None => Ok(None),
    }
}
