//! Configuration validation logic.

use std::path::PathBuf;

/// An upstream key is mandatory; the server refuses to start without one.
pub fn validate_api_key(api_key: &str) -> Result<(), Box<dyn std::error::Error>> {
    if api_key.trim().is_empty() {
        return Err("GEMINI_API_KEY is not set. Provide GEMINI_API_KEY (or API_KEY) in the \
                    environment, a .env file, or gemini.api_key in the YAML config"
            .into());
    }
    Ok(())
}

/// Certificate and key must be configured together.
pub fn validate_tls(
    cert_path: &Option<PathBuf>,
    key_path: &Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    match (cert_path, key_path) {
        (Some(_), None) => Err("TLS_CERT_PATH is set but TLS_KEY_PATH is missing".into()),
        (None, Some(_)) => Err("TLS_KEY_PATH is set but TLS_CERT_PATH is missing".into()),
        _ => Ok(()),
    }
}

/// Limits of zero would reject every connection or tool call.
pub fn validate_limits(
    rate_limit_requests_per_second: u32,
    max_connections_per_ip: u32,
    idle_timeout_seconds: u64,
    tool_timeout_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if rate_limit_requests_per_second == 0 {
        return Err("RATE_LIMIT_REQUESTS_PER_SECOND must be greater than 0".into());
    }
    if max_connections_per_ip == 0 {
        return Err("MAX_CONNECTIONS_PER_IP must be greater than 0".into());
    }
    if idle_timeout_seconds == 0 {
        return Err("SESSION_IDLE_TIMEOUT_SECONDS must be greater than 0".into());
    }
    if tool_timeout_ms == 0 {
        return Err("TOOL_TIMEOUT_MS must be greater than 0".into());
    }
    Ok(())
}
