// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `deskline token` command implementation.

use deskline_chat::identity::mint_credential;
use deskline_config::model::AuthConfig;
use deskline_core::DesklineError;
use deskline_core::types::Role;

/// Mint a credential for `user_id` valid for `ttl` seconds (or the
/// configured session lifetime) from `now`.
pub fn mint(
    auth: &AuthConfig,
    user_id: &str,
    role: Role,
    ttl: Option<u64>,
    now: i64,
) -> Result<String, DesklineError> {
    let secret = auth.session_secret.as_deref().ok_or_else(|| {
        DesklineError::Config("auth.session_secret is not set".to_string())
    })?;
    let ttl = ttl.unwrap_or(auth.session_ttl_secs);
    if ttl == 0 {
        return Err(DesklineError::Validation("ttl must be positive".to_string()));
    }
    let ttl = i64::try_from(ttl)
        .map_err(|_| DesklineError::Validation("ttl is too large".to_string()))?;
    mint_credential(secret.as_bytes(), user_id, role, now.saturating_add(ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_chat::identity::verify_credential;

    const SECRET: &str = "token-command-secret-0123456789abcdef";

    fn auth() -> AuthConfig {
        AuthConfig {
            session_secret: Some(SECRET.to_string()),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn minted_credential_verifies_until_expiry() {
        let credential = mint(&auth(), "agent-7", Role::Support, Some(60), 1_000).unwrap();
        let claims = verify_credential(SECRET.as_bytes(), &credential, 1_030).unwrap();
        assert_eq!(claims.user_id, "agent-7");
        assert_eq!(claims.role, Role::Support);
        assert!(verify_credential(SECRET.as_bytes(), &credential, 1_060).is_err());
    }

    #[test]
    fn default_ttl_comes_from_config() {
        let credential = mint(&auth(), "user-1", Role::Customer, None, 0).unwrap();
        let expires = AuthConfig::default().session_ttl_secs.to_string();
        assert!(credential.starts_with(&format!("user-1.customer.{expires}.")));
    }

    #[test]
    fn requires_a_secret() {
        let err = mint(&AuthConfig::default(), "user-1", Role::Customer, None, 0).unwrap_err();
        assert!(err.to_string().contains("session_secret"));
    }

    #[test]
    fn rejects_zero_ttl() {
        assert!(mint(&auth(), "user-1", Role::Customer, Some(0), 0).is_err());
    }
}
