// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity resolution: who is behind a connection or request.
//!
//! Two credential kinds are accepted interchangeably:
//! - a signed session credential `user_id.role.expires_unix.signature_hex`
//!   where the signature is HMAC-SHA256 over `user_id.role.expires_unix`;
//! - a client-generated guest token, treated as a bearer secret.
//!
//! Presenting a customer credential together with a guest token asks for
//! that guest's conversations to be linked to the account.

use std::str::FromStr;

use deskline_config::model::AuthConfig;
use deskline_core::types::{Identity, Role, SenderRole, Side};
use deskline_core::DesklineError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The resolved party behind a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// A customer, authenticated or anonymous.
    Visitor(Identity),
    /// A support agent, identified by user id.
    Agent(String),
}

impl Caller {
    pub fn is_agent(&self) -> bool {
        matches!(self, Caller::Agent(_))
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Caller::Agent(id) => Some(id),
            Caller::Visitor(_) => None,
        }
    }

    pub fn sender_role(&self) -> SenderRole {
        match self {
            Caller::Visitor(identity) => identity.sender_role(),
            Caller::Agent(_) => SenderRole::Support,
        }
    }

    /// User id recorded on messages this caller sends (none for guests).
    pub fn sender_user_id(&self) -> Option<&str> {
        match self {
            Caller::Visitor(identity) => identity.user_id(),
            Caller::Agent(id) => Some(id),
        }
    }

    pub fn side(&self) -> Side {
        self.sender_role().side()
    }

    /// Short label safe to put in logs.
    pub fn log_label(&self) -> String {
        match self {
            Caller::Visitor(Identity::User { id }) => format!("customer:{id}"),
            Caller::Visitor(Identity::Guest { .. }) => "guest".to_string(),
            Caller::Agent(id) => format!("agent:{id}"),
        }
    }
}

/// Output of [`IdentityResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub caller: Caller,
    /// Guest token whose conversations should be linked to `caller` before it
    /// is admitted.
    pub link_guest: Option<String>,
}

/// The verified payload of a session credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: String,
    pub role: Role,
    pub expires_at: i64,
}

/// Sign a session credential for `user_id`.
pub fn mint_credential(
    secret: &[u8],
    user_id: &str,
    role: Role,
    expires_at: i64,
) -> Result<String, DesklineError> {
    if user_id.is_empty() || user_id.contains('.') {
        return Err(DesklineError::Validation(
            "user id must be non-empty and must not contain '.'".to_string(),
        ));
    }
    let payload = format!("{user_id}.{role}.{expires_at}");
    let signature = sign(secret, &payload)?;
    Ok(format!("{payload}.{}", hex::encode(signature)))
}

/// Verify a session credential and return its claims.
///
/// `now` is unix seconds; credentials with `expires_at <= now` are rejected.
pub fn verify_credential(
    secret: &[u8],
    credential: &str,
    now: i64,
) -> Result<SessionClaims, DesklineError> {
    let invalid = || DesklineError::Unauthenticated("invalid session credential".to_string());

    let (payload, signature_hex) = credential.rsplit_once('.').ok_or_else(invalid)?;
    let signature = hex::decode(signature_hex).map_err(|_| invalid())?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| DesklineError::Internal(format!("hmac key rejected: {e}")))?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature).map_err(|_| invalid())?;

    let mut parts = payload.splitn(3, '.');
    let (Some(user_id), Some(role), Some(expires)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    if user_id.is_empty() {
        return Err(invalid());
    }
    let role = Role::from_str(role).map_err(|_| invalid())?;
    let expires_at: i64 = expires.parse().map_err(|_| invalid())?;
    if expires_at <= now {
        return Err(DesklineError::Unauthenticated(
            "session credential expired".to_string(),
        ));
    }

    Ok(SessionClaims {
        user_id: user_id.to_string(),
        role,
        expires_at,
    })
}

fn sign(secret: &[u8], payload: &str) -> Result<Vec<u8>, DesklineError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| DesklineError::Internal(format!("hmac key rejected: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Turns presented credentials into a [`Caller`].
#[derive(Clone)]
pub struct IdentityResolver {
    secret: Option<Vec<u8>>,
    guest_token_min_len: usize,
    guest_token_max_len: usize,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("secret", &self.secret.as_ref().map(|_| "[redacted]"))
            .field("guest_token_min_len", &self.guest_token_min_len)
            .field("guest_token_max_len", &self.guest_token_max_len)
            .finish()
    }
}

impl IdentityResolver {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config
                .session_secret
                .as_ref()
                .map(|s| s.as_bytes().to_vec()),
            guest_token_min_len: config.guest_token_min_len,
            guest_token_max_len: config.guest_token_max_len,
        }
    }

    /// Check the shape of a guest token.
    pub fn validate_guest_token(&self, token: &str) -> Result<(), DesklineError> {
        let len = token.len();
        if len < self.guest_token_min_len || len > self.guest_token_max_len {
            return Err(DesklineError::Unauthenticated(format!(
                "guest token must be {}..={} characters",
                self.guest_token_min_len, self.guest_token_max_len
            )));
        }
        if !token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(DesklineError::Unauthenticated(
                "guest token contains invalid characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve using the current wall clock.
    pub fn resolve(
        &self,
        credential: Option<&str>,
        guest_token: Option<&str>,
    ) -> Result<Resolved, DesklineError> {
        self.resolve_at(credential, guest_token, chrono::Utc::now().timestamp())
    }

    /// Resolve presented credentials.
    ///
    /// A session credential, when present, must verify; it is never silently
    /// downgraded to the guest token. Agents ignore any guest token.
    pub fn resolve_at(
        &self,
        credential: Option<&str>,
        guest_token: Option<&str>,
        now: i64,
    ) -> Result<Resolved, DesklineError> {
        let credential = credential.filter(|c| !c.is_empty());
        let guest_token = guest_token.filter(|g| !g.is_empty());

        if let Some(credential) = credential {
            let Some(secret) = &self.secret else {
                return Err(DesklineError::Unauthenticated(
                    "session credentials are not accepted by this server".to_string(),
                ));
            };
            let claims = verify_credential(secret, credential, now)?;
            return match claims.role {
                Role::Support => Ok(Resolved {
                    caller: Caller::Agent(claims.user_id),
                    link_guest: None,
                }),
                Role::Customer => {
                    let link_guest = match guest_token {
                        Some(token) => {
                            self.validate_guest_token(token)?;
                            Some(token.to_string())
                        }
                        None => None,
                    };
                    Ok(Resolved {
                        caller: Caller::Visitor(Identity::User {
                            id: claims.user_id,
                        }),
                        link_guest,
                    })
                }
            };
        }

        if let Some(token) = guest_token {
            self.validate_guest_token(token)?;
            return Ok(Resolved {
                caller: Caller::Visitor(Identity::Guest {
                    token: token.to_string(),
                }),
                link_guest: None,
            });
        }

        Err(DesklineError::Unauthenticated(
            "a session credential or guest token is required".to_string(),
        ))
    }
}
