//! Route assembly

pub mod realtime;

use std::sync::Arc;

use axum::{Router, middleware, routing::get};

use crate::handlers::api::health_check;
use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

/// Public routes plus the relay endpoint behind the connection limiter.
///
/// Cross-cutting layers (CORS, rate limiting, security headers) are added by
/// the binary on top of this.
pub fn create_app(state: Arc<AppState>) -> Router {
    let realtime_routes = realtime::create_realtime_router().layer(
        middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
    );

    Router::new()
        .route("/", get(health_check))
        .merge(realtime_routes)
        .with_state(state)
}
