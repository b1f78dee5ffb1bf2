// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Deskline configuration.
///
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DesklineConfig {
    /// HTTP/WebSocket listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credential verification settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Chat routing limits and behavior.
    #[serde(default)]
    pub chat: ChatConfig,
}

/// HTTP/WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("deskline").join("deskline.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("deskline.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Credential verification configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// HMAC key for session credentials. `None` means only guests can connect.
    #[serde(default)]
    pub session_secret: Option<String>,

    /// Lifetime of credentials minted by `deskline token`.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Shortest guest token accepted.
    #[serde(default = "default_guest_token_min_len")]
    pub guest_token_min_len: usize,

    /// Longest guest token accepted.
    #[serde(default = "default_guest_token_max_len")]
    pub guest_token_max_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: None,
            session_ttl_secs: default_session_ttl_secs(),
            guest_token_min_len: default_guest_token_min_len(),
            guest_token_max_len: default_guest_token_max_len(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "session_secret",
                &self.session_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("guest_token_min_len", &self.guest_token_min_len)
            .field("guest_token_max_len", &self.guest_token_max_len)
            .finish()
    }
}

fn default_session_ttl_secs() -> u64 {
    86_400
}

fn default_guest_token_min_len() -> usize {
    16
}

fn default_guest_token_max_len() -> usize {
    128
}

/// Chat routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatConfig {
    /// Maximum characters in a single message body.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Messages included in `chat_joined` and returned by the history endpoint.
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,

    /// Outbound events buffered per connection before it is treated as stalled.
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,

    /// Let a customer hold several active conversations via `forceNew`.
    #[serde(default)]
    pub allow_multiple_conversations: bool,

    /// Seconds to wait for open connections to flush on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            history_limit: default_history_limit(),
            connection_buffer: default_connection_buffer(),
            allow_multiple_conversations: false,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_max_message_length() -> usize {
    4000
}

fn default_history_limit() -> i64 {
    500
}

fn default_connection_buffer() -> usize {
    256
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = DesklineConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(config.storage.wal_mode);
        assert!(config.storage.database_path.ends_with("deskline.db"));
        assert!(config.auth.session_secret.is_none());
        assert_eq!(config.chat.history_limit, 500);
        assert!(!config.chat.allow_multiple_conversations);
    }

    #[test]
    fn auth_config_debug_redacts_secret() {
        let auth = AuthConfig {
            session_secret: Some("0123456789abcdef0123456789abcdef".into()),
            ..AuthConfig::default()
        };
        let out = format!("{auth:?}");
        assert!(!out.contains("0123456789abcdef"));
        assert!(out.contains("[redacted]"));
    }
}
