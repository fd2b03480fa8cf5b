//! Merging YAML and environment configurations.
//!
//! Priority (highest to lowest): YAML, environment, defaults.

use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ServerConfig, TlsConfig, validation};
use crate::core::realtime::DEFAULT_GEMINI_MODEL;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 60;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 5000;

/// Build a [`ServerConfig`] from the environment with optional YAML overrides.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let gemini = yaml.gemini.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let tls = resolve_tls(server.tls, &env)?;

    let config = ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        tls,

        gemini_api_key: gemini.api_key.or(env.gemini_api_key).unwrap_or_default(),
        gemini_model: gemini
            .model
            .or(env.gemini_model)
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        gemini_live_url: gemini.url.or(env.gemini_live_url),
        gemini_voice: gemini.voice.or(env.gemini_voice),
        system_instruction: gemini.system_instruction.or(env.system_instruction),

        cors_allowed_origins: security.cors_allowed_origins.or(env.cors_allowed_origins),
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .or(env.rate_limit_requests_per_second)
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .or(env.rate_limit_burst_size)
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .or(env.max_connections_per_ip)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),

        idle_timeout_seconds: session
            .idle_timeout_seconds
            .or(env.idle_timeout_seconds)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECONDS),
        tool_timeout_ms: session
            .tool_timeout_ms
            .or(env.tool_timeout_ms)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_MS),
    };

    Ok(config)
}

/// YAML `tls.enabled: false` switches TLS off even when the environment
/// provides paths.
fn resolve_tls(
    yaml: Option<super::yaml::TlsYaml>,
    env: &EnvConfig,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    let yaml = yaml.unwrap_or_default();
    if yaml.enabled == Some(false) {
        return Ok(None);
    }

    let cert_path = yaml
        .cert_path
        .or_else(|| env.tls_cert_path.clone())
        .map(PathBuf::from);
    let key_path = yaml
        .key_path
        .or_else(|| env.tls_key_path.clone())
        .map(PathBuf::from);

    validation::validate_tls(&cert_path, &key_path)?;

    Ok(match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => Some(TlsConfig {
            cert_path,
            key_path,
        }),
        _ => None,
    })
}
