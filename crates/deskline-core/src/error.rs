// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Deskline support-chat router.

use thiserror::Error;

/// Why a state transition was refused even though the request was well formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Another agent (or this one, in another request) holds the claim.
    AlreadyClaimed { agent_id: String },
    /// The conversation is closed; it can be read but no longer changed.
    ConversationClosed,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::AlreadyClaimed { .. } => write!(f, "conversation already claimed"),
            ConflictReason::ConversationClosed => write!(f, "conversation is closed"),
        }
    }
}

/// The primary error type used across all Deskline crates.
#[derive(Debug, Error)]
pub enum DesklineError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Malformed input rejected at the handler boundary.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No usable credential was presented, or it failed verification.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller is known but may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state transition lost a race or targeted a terminal state.
    #[error("conflict: {0}")]
    Conflict(ConflictReason),

    /// Transport errors (socket bind failure, closed connection channel).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DesklineError {
    /// Stable machine-readable code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            DesklineError::Validation(_) => "invalid_request",
            DesklineError::Unauthenticated(_) => "unauthenticated",
            DesklineError::Forbidden(_) => "forbidden",
            DesklineError::NotFound(_) => "not_found",
            DesklineError::Conflict(ConflictReason::AlreadyClaimed { .. }) => "already_claimed",
            DesklineError::Conflict(ConflictReason::ConversationClosed) => "conversation_closed",
            DesklineError::Storage { .. } | DesklineError::Timeout { .. } => "storage_unavailable",
            DesklineError::Config(_)
            | DesklineError::Channel { .. }
            | DesklineError::Internal(_) => "internal",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DesklineError::Storage { .. } | DesklineError::Timeout { .. }
        )
    }

    /// Message safe to show to a client.
    ///
    /// Storage and internal failures are collapsed to a generic sentence so
    /// backend detail never leaves the process.
    pub fn public_message(&self) -> String {
        match self {
            DesklineError::Storage { .. } | DesklineError::Timeout { .. } => {
                "storage temporarily unavailable, please retry".to_string()
            }
            DesklineError::Config(_)
            | DesklineError::Channel { .. }
            | DesklineError::Internal(_) => "internal server error".to_string(),
            DesklineError::Conflict(reason) => reason.to_string(),
            DesklineError::Validation(m)
            | DesklineError::Unauthenticated(m)
            | DesklineError::Forbidden(m)
            | DesklineError::NotFound(m) => m.clone(),
        }
    }
}
