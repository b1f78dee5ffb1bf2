// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `deskline serve` command implementation.
//!
//! Opens storage, rebuilds the queue from it, starts the gateway, and on
//! SIGINT/SIGTERM drains connections before checkpointing the database.

use std::sync::Arc;
use std::time::Duration;

use deskline_chat::ChatService;
use deskline_chat::shutdown;
use deskline_config::DesklineConfig;
use deskline_core::{DesklineError, PluginAdapter, StorageAdapter};
use deskline_gateway::ChatGateway;
use deskline_storage::SqliteStorage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs the `deskline serve` command.
pub async fn run_serve(config: DesklineConfig) -> Result<(), DesklineError> {
    init_tracing(&config.server.log_level);
    let cancel = shutdown::install_signal_handler();
    serve_until(config, cancel, |_| {}).await
}

/// Serve until `cancel` fires. `on_ready` receives the bound address.
pub async fn serve_until(
    config: DesklineConfig,
    cancel: CancellationToken,
    on_ready: impl FnOnce(std::net::SocketAddr),
) -> Result<(), DesklineError> {
    // Fail closed: without a secret no agent could ever authenticate.
    if config.auth.session_secret.is_none() {
        error!("auth.session_secret is not set, refusing to start");
        return Err(DesklineError::Config(
            "auth.session_secret must be set to serve".to_string(),
        ));
    }

    info!("starting deskline serve");

    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    let storage: Arc<dyn StorageAdapter> = Arc::new(storage);

    let service = Arc::new(ChatService::new(
        storage.clone(),
        &config.chat,
        &config.auth,
    ));
    service.rebuild_queue().await?;

    let gateway = ChatGateway::new(config.server.clone(), service.clone(), cancel.clone());
    let addr = match gateway.start().await {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "gateway failed to start");
            storage.close().await?;
            return Err(e);
        }
    };
    info!(%addr, "deskline ready");
    on_ready(addr);

    cancel.cancelled().await;
    info!("shutdown requested");

    let remaining = shutdown::drain_connections(
        &service,
        Duration::from_secs(config.chat.shutdown_timeout_secs),
    )
    .await;
    if remaining > 0 {
        warn!(remaining, "stopping with connections still open");
    }

    gateway.shutdown().await?;
    storage.close().await?;
    info!("deskline stopped");
    Ok(())
}

/// Initialize the tracing subscriber. `RUST_LOG` wins when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deskline={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_config::model::{AuthConfig, ServerConfig, StorageConfig};

    fn config(dir: &tempfile::TempDir, secret: Option<&str>) -> DesklineConfig {
        DesklineConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                ..ServerConfig::default()
            },
            storage: StorageConfig {
                database_path: dir.path().join("serve.db").to_string_lossy().into_owned(),
                wal_mode: true,
            },
            auth: AuthConfig {
                session_secret: secret.map(str::to_string),
                ..AuthConfig::default()
            },
            ..DesklineConfig::default()
        }
    }

    #[tokio::test]
    async fn refuses_to_start_without_secret() {
        let dir = tempfile::tempdir().unwrap();
        let err = serve_until(config(&dir, None), CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("session_secret"));
    }

    #[tokio::test]
    async fn stops_cleanly_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let result = serve_until(
            config(&dir, Some("serve-test-secret-0123456789abcdef")),
            cancel,
            move |addr| {
                assert_ne!(addr.port(), 0);
                trigger.cancel();
            },
        )
        .await;
        assert!(result.is_ok());
        assert!(dir.path().join("serve.db").exists());
    }
}
