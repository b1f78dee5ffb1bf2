// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket transport for the Deskline chat service.
//!
//! The gateway exposes the real-time channel on `/ws` and the REST facade on
//! `/chat/*`. Both are thin: they resolve the caller, hand the request to the
//! shared [`ChatService`], and render the result.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deskline_chat::ChatService;
use deskline_config::model::ServerConfig;
use deskline_core::types::{AdapterType, HealthStatus};
use deskline_core::{DesklineError, PluginAdapter};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::server::GatewayState;

/// How long `shutdown` waits for the server task to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The gateway server as a managed adapter.
///
/// `start` binds the socket up front so bind errors reach the caller, then
/// serves in a background task until the shutdown token is cancelled.
pub struct ChatGateway {
    config: ServerConfig,
    service: Arc<ChatService>,
    shutdown: CancellationToken,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
    server_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ChatGateway {
    pub fn new(config: ServerConfig, service: Arc<ChatService>, shutdown: CancellationToken) -> Self {
        Self {
            config,
            service,
            shutdown,
            local_addr: std::sync::Mutex::new(None),
            server_handle: Mutex::new(None),
        }
    }

    /// Bind and start serving. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, DesklineError> {
        let listener = server::bind(&self.config.host, self.config.port).await?;
        let addr = listener.local_addr().map_err(|e| DesklineError::Channel {
            message: format!("failed to read gateway address: {e}"),
            source: Some(Box::new(e)),
        })?;
        let state = GatewayState::new(self.service.clone(), self.shutdown.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = server::serve(listener, state).await {
                tracing::error!(error = %e, "gateway server error");
            }
        });
        *self.server_handle.lock().await = Some(handle);
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(addr);
        }
        Ok(addr)
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|slot| *slot)
    }

    /// Wait for the server task to exit on its own (after cancellation).
    pub async fn wait(&self) {
        let handle = self.server_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl PluginAdapter for ChatGateway {
    fn name(&self) -> &str {
        "gateway"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        let handle = self.server_handle.lock().await;
        match handle.as_ref() {
            Some(h) if !h.is_finished() => Ok(HealthStatus::Healthy),
            Some(_) => Ok(HealthStatus::Unhealthy("server stopped".to_string())),
            None => Ok(HealthStatus::Unhealthy("server not started".to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        self.shutdown.cancel();
        let handle = self.server_handle.lock().await.take();
        if let Some(mut handle) = handle
            && tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err()
        {
            tracing::warn!("gateway server did not stop in time, aborting");
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_test_utils::TestHarness;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn gateway_identity() {
        let harness = TestHarness::new().await.unwrap();
        let gateway = ChatGateway::new(test_config(), harness.service.clone(), CancellationToken::new());
        assert_eq!(gateway.name(), "gateway");
        assert_eq!(gateway.adapter_type(), AdapterType::Channel);
        assert_eq!(gateway.version(), semver::Version::new(0, 1, 0));
    }

    #[tokio::test]
    async fn health_follows_server_lifecycle() {
        let harness = TestHarness::new().await.unwrap();
        let gateway = ChatGateway::new(test_config(), harness.service.clone(), CancellationToken::new());
        match gateway.health_check().await.unwrap() {
            HealthStatus::Unhealthy(msg) => assert!(msg.contains("not started")),
            other => panic!("expected unhealthy before start, got {other:?}"),
        }

        let addr = gateway.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(gateway.local_addr(), Some(addr));
        assert_eq!(gateway.health_check().await.unwrap(), HealthStatus::Healthy);

        gateway.shutdown().await.unwrap();
        assert!(matches!(
            gateway.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }
}
