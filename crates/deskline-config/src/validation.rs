// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes.

use crate::diagnostic::ConfigError;
use crate::model::DesklineConfig;

/// Shortest accepted `auth.session_secret`, in bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &DesklineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let host = config.server.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::Validation {
            message: "server.host must not be empty".to_string(),
        });
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::Validation {
                message: format!("server.host `{host}` is not a valid IP address or hostname"),
            });
        }
    }

    if config.server.port == 0 {
        errors.push(ConfigError::Validation {
            message: "server.port must be non-zero".to_string(),
        });
    }

    let level = config.server.log_level.to_ascii_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "server.log_level `{}` must be one of trace, debug, info, warn, error",
                config.server.log_level
            ),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if let Some(secret) = &config.auth.session_secret
        && secret.len() < MIN_SESSION_SECRET_LEN
    {
        errors.push(ConfigError::Validation {
            message: format!(
                "auth.session_secret must be at least {MIN_SESSION_SECRET_LEN} bytes, got {}",
                secret.len()
            ),
        });
    }

    if config.auth.session_ttl_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "auth.session_ttl_secs must be positive".to_string(),
        });
    }

    if config.auth.guest_token_min_len == 0 {
        errors.push(ConfigError::Validation {
            message: "auth.guest_token_min_len must be positive".to_string(),
        });
    }

    if config.auth.guest_token_min_len > config.auth.guest_token_max_len {
        errors.push(ConfigError::Validation {
            message: format!(
                "auth.guest_token_min_len ({}) must not exceed auth.guest_token_max_len ({})",
                config.auth.guest_token_min_len, config.auth.guest_token_max_len
            ),
        });
    }

    if config.chat.max_message_length == 0 {
        errors.push(ConfigError::Validation {
            message: "chat.max_message_length must be positive".to_string(),
        });
    }

    if config.chat.history_limit <= 0 {
        errors.push(ConfigError::Validation {
            message: format!(
                "chat.history_limit must be positive, got {}",
                config.chat.history_limit
            ),
        });
    }

    if config.chat.connection_buffer == 0 {
        errors.push(ConfigError::Validation {
            message: "chat.connection_buffer must be positive".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&DesklineConfig::default()).is_ok());
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut config = DesklineConfig::default();
        config.auth.session_secret = Some("too-short".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("session_secret"));
    }

    #[test]
    fn collects_all_errors() {
        let mut config = DesklineConfig::default();
        config.server.host = String::new();
        config.server.port = 0;
        config.chat.history_limit = 0;
        config.auth.guest_token_min_len = 200;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn invalid_host_characters_rejected() {
        let mut config = DesklineConfig::default();
        config.server.host = "bad host!".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().contains("server.host"));
    }
}
