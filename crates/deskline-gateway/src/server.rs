// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use deskline_chat::ChatService;
use deskline_core::DesklineError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_caller;
use crate::handlers;
use crate::ws;

/// Health state for the unauthenticated health endpoint.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<ChatService>,
    pub health: HealthState,
    /// Cancelled when the process begins shutting down.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(service: Arc<ChatService>, shutdown: CancellationToken) -> Self {
        Self {
            service,
            health: HealthState {
                start_time: std::time::Instant::now(),
            },
            shutdown,
        }
    }
}

/// Assemble the gateway routes.
///
/// - GET /health (public)
/// - /chat/* REST facade (caller resolved by middleware)
/// - GET /ws (caller resolved during the handshake)
pub fn build_router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/chat/start", post(handlers::post_start))
        .route("/chat/queue", get(handlers::get_queue))
        .route("/chat/link", post(handlers::post_link))
        .route("/chat/{id}", get(handlers::get_conversation))
        .route("/chat/{id}/messages", get(handlers::get_messages))
        .route("/chat/{id}/message", post(handlers::post_message))
        .route("/chat/{id}/claim", post(handlers::post_claim))
        .route("/chat/{id}/close", post(handlers::post_close))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_caller,
        ))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the listening socket.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, DesklineError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|e| DesklineError::Channel {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })
}

/// Serve until the shutdown token is cancelled, then stop accepting and
/// let in-flight requests finish.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<(), DesklineError> {
    let shutdown = state.shutdown.clone();
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    if let Some(addr) = addr {
        tracing::info!(%addr, "gateway server listening");
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| DesklineError::Channel {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("gateway server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_test_utils::TestHarness;

    #[tokio::test]
    async fn gateway_state_is_clone() {
        let harness = TestHarness::new().await.unwrap();
        let state = GatewayState::new(harness.service.clone(), CancellationToken::new());
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.service, &cloned.service));
    }

    #[tokio::test]
    async fn bind_reports_unusable_address() {
        let taken = bind("127.0.0.1", 0).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(err.to_string().contains("failed to bind gateway"));
    }

    #[tokio::test]
    async fn serve_returns_after_cancellation() {
        let harness = TestHarness::new().await.unwrap();
        let token = CancellationToken::new();
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let handle = tokio::spawn(serve(
            listener,
            GatewayState::new(harness.service.clone(), token.clone()),
        ));
        token.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
