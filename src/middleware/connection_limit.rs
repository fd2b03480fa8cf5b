//! Connection limit middleware for the relay WebSocket
//!
//! Enforces the global WebSocket cap and the per-IP cap before the upgrade
//! handshake, so a refused client never reaches the relay handler.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use duplex_gateway::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/realtime", get(relay_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client address of an admitted upgrade. The relay handler releases the
/// slot under this address when the socket ends.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub IpAddr);

fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Admit or refuse WebSocket upgrades.
///
/// - 503 Service Unavailable when the global cap is reached
/// - 429 Too Many Requests when the caller's IP is at its cap
///
/// Non-upgrade requests pass through untouched. When the upgrade does not
/// complete (anything other than 101), the reserved slot is returned here
/// because the relay handler will never run.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            let response = next.run(request).await;
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                tracing::debug!(
                    ip = %client_ip,
                    status = %response.status(),
                    "Upgrade not completed, releasing connection slot"
                );
                state.release_connection(client_ip);
            }
            response
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                connections = state.ws_connection_count(),
                "Rejecting connection: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting connection: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}
