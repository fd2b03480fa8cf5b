//! Shared application state.
//!
//! Holds the configuration, the tool registry, connection accounting used by
//! the connection-limit middleware, and the registry of live client
//! connections. Registry entries are inserted and removed only by the handler
//! task that owns the connection; everyone else only reads them or cancels
//! them through the shared shutdown token.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::core::tools::ToolRegistry;

/// Reasons a new WebSocket connection is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP connection limit reached")]
    PerIpLimitReached,
}

/// Registry record of one client connection.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub peer: Option<IpAddr>,
    pub connected_at: Instant,
    /// Set while an upstream session is active on the connection.
    pub session_started_at: Option<Instant>,
    /// Cancelled on server shutdown.
    pub cancel: CancellationToken,
}

pub struct AppState {
    pub config: ServerConfig,
    pub tools: Arc<ToolRegistry>,

    sessions: DashMap<Uuid, SessionEntry>,
    shutdown: CancellationToken,

    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_tools(config, ToolRegistry::builtin())
    }

    /// State with a custom tool registry.
    pub fn with_tools(config: ServerConfig, tools: ToolRegistry) -> Arc<Self> {
        Arc::new(Self {
            config,
            tools: Arc::new(tools),
            sessions: DashMap::new(),
            shutdown: CancellationToken::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    // =========================================================================
    // Connection accounting
    // =========================================================================

    /// Reserve a WebSocket slot for `ip`.
    ///
    /// Checks the global limit first, then the per-IP limit. A successful call
    /// must be paired with [`AppState::release_connection`].
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        match self.config.max_websocket_connections {
            Some(max) => {
                self.ws_connections
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                        (current < max).then_some(current + 1)
                    })
                    .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;
            }
            None => {
                self.ws_connections.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            drop(count);
            self.ws_connections.fetch_sub(1, Ordering::SeqCst);
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    /// Release a slot reserved by [`AppState::try_acquire_connection`].
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });

        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }

    // =========================================================================
    // Session registry
    // =========================================================================

    /// Register a new connection and return the token that cancels it on
    /// shutdown.
    pub fn register_session(&self, id: Uuid, peer: Option<IpAddr>) -> CancellationToken {
        let cancel = self.shutdown.child_token();
        self.sessions.insert(
            id,
            SessionEntry {
                peer,
                connected_at: Instant::now(),
                session_started_at: None,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Remove a connection. Returns false if it was not registered.
    pub fn unregister_session(&self, id: &Uuid) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Record that an upstream session became active (or ended) on `id`.
    pub fn mark_session_active(&self, id: &Uuid, active: bool) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.session_started_at = active.then(Instant::now);
        }
    }

    pub fn session(&self, id: &Uuid) -> Option<SessionEntry> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    /// Number of registered connections.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of connections with an active upstream session.
    pub fn active_session_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.session_started_at.is_some())
            .count()
    }

    /// Token cancelled by [`AppState::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every registered connection. Connections registered afterwards
    /// start out cancelled.
    pub fn shutdown(&self) {
        info!(
            connections = self.sessions.len(),
            "Shutting down all client sessions"
        );
        self.shutdown.cancel();
    }
}
