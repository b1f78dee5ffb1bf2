// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Deskline configuration system.

use deskline_config::diagnostic::ConfigError;
use deskline_config::model::DesklineConfig;
use deskline_config::{load_and_validate_str, load_config_from_str};

#[test]
fn full_toml_deserializes() {
    let toml = r#"
[server]
host = "0.0.0.0"
port = 9000
log_level = "debug"

[storage]
database_path = "/tmp/deskline-test.db"
wal_mode = false

[auth]
session_secret = "0123456789abcdef0123456789abcdef"
session_ttl_secs = 3600
guest_token_min_len = 8
guest_token_max_len = 64

[chat]
max_message_length = 2000
history_limit = 50
connection_buffer = 32
allow_multiple_conversations = true
shutdown_timeout_secs = 3
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.storage.database_path, "/tmp/deskline-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.auth.session_ttl_secs, 3600);
    assert_eq!(config.auth.guest_token_min_len, 8);
    assert_eq!(config.chat.max_message_length, 2000);
    assert_eq!(config.chat.history_limit, 50);
    assert!(config.chat.allow_multiple_conversations);
    assert_eq!(config.chat.shutdown_timeout_secs, 3);
}

#[test]
fn empty_toml_uses_defaults() {
    let config = load_config_from_str("").expect("empty config is valid");
    let defaults = DesklineConfig::default();
    assert_eq!(config.server.port, defaults.server.port);
    assert_eq!(config.chat.max_message_length, defaults.chat.max_message_length);
}

#[test]
fn unknown_key_reports_suggestion() {
    let toml = r#"
[chat]
max_mesage_length = 10
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key,
            suggestion,
            span,
            ..
        } => {
            assert_eq!(key, "max_mesage_length");
            assert_eq!(suggestion.as_deref(), Some("max_message_length"));
            assert!(span.is_none(), "inline sources carry no file metadata");
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_section_is_rejected() {
    let toml = r#"
[telemetry]
enabled = true
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    assert!(matches!(&errors[0], ConfigError::UnknownKey { key, .. } if key == "telemetry"));
}

#[test]
fn wrong_type_reports_invalid_type() {
    let toml = r#"
[server]
port = "eighty"
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    match &errors[0] {
        ConfigError::InvalidType { key, .. } => assert!(key.ends_with("port")),
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

#[test]
fn semantic_validation_runs_after_parse() {
    let toml = r#"
[auth]
session_secret = "short"
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    assert!(matches!(&errors[0], ConfigError::Validation { message } if message.contains("session_secret")));
}
