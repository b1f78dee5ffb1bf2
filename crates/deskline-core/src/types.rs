// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the storage, routing and transport layers.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Server-assigned, immutable identifier of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identifier. Assigned from a single durable sequence, so ordering by
/// id is the storage order within every conversation.
pub type MessageId = i64;

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`PluginAdapter`](crate::PluginAdapter).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Channel,
    Storage,
}

/// Lifecycle state of a conversation.
///
/// Legal transitions are `open -> claimed`, `open -> closed` and
/// `claimed -> closed`. A `claimed -> open` release would slot in as one more
/// arm of [`ConversationStatus::can_transition_to`] together with clearing the
/// assignee; nothing else relies on the transition set being closed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Claimed,
    Closed,
}

impl ConversationStatus {
    pub fn can_transition_to(self, next: ConversationStatus) -> bool {
        use ConversationStatus::*;
        matches!((self, next), (Open, Claimed) | (Open, Closed) | (Claimed, Closed))
    }

    /// Open or claimed.
    pub fn is_active(self) -> bool {
        !matches!(self, ConversationStatus::Closed)
    }
}

/// Account role carried by a session credential.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Support,
}

/// Role a message was sent under.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Customer,
    Guest,
    Support,
}

impl SenderRole {
    /// Which side of the conversation this role speaks for.
    pub fn side(self) -> Side {
        match self {
            SenderRole::Customer | SenderRole::Guest => Side::Customer,
            SenderRole::Support => Side::Support,
        }
    }
}

/// The two parties of a conversation. Typing and read markers are tracked per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Customer,
    Support,
}

/// The originator of a conversation: an account, or an anonymous visitor.
///
/// Persisted as the nullable pair `customer_user_id` / `guest_token`; this
/// tagged form is what everything above the storage boundary works with.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    User { id: String },
    Guest { token: String },
}

impl Identity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::User { id } => Some(id),
            Identity::Guest { .. } => None,
        }
    }

    pub fn guest_token(&self) -> Option<&str> {
        match self {
            Identity::User { .. } => None,
            Identity::Guest { token } => Some(token),
        }
    }

    /// Role used when this identity authors a message.
    pub fn sender_role(&self) -> SenderRole {
        match self {
            Identity::User { .. } => SenderRole::Customer,
            Identity::Guest { .. } => SenderRole::Guest,
        }
    }
}

// Guest tokens are bearer secrets.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::User { id } => f.debug_struct("User").field("id", id).finish(),
            Identity::Guest { .. } => f
                .debug_struct("Guest")
                .field("token", &"[redacted]")
                .finish(),
        }
    }
}

/// A support conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub originator: Identity,
    pub status: ConversationStatus,
    /// Set only while `status` is `Claimed` (kept for the record after close).
    pub assigned_agent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
    pub closed_by: Option<String>,
}

impl Conversation {
    pub fn customer_user_id(&self) -> Option<&str> {
        self.originator.user_id()
    }

    /// Whether `identity` is the originator of this conversation.
    pub fn is_owned_by(&self, identity: &Identity) -> bool {
        &self.originator == identity
    }

    /// Open and not held by any agent: eligible for the queue.
    pub fn is_queued(&self) -> bool {
        self.status == ConversationStatus::Open && self.assigned_agent_id.is_none()
    }

    pub fn is_assigned_to(&self, agent_id: &str) -> bool {
        self.status == ConversationStatus::Claimed
            && self.assigned_agent_id.as_deref() == Some(agent_id)
    }
}

/// A file reference produced by the upload facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub name: String,
}

/// A persisted chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_role: SenderRole,
    pub sender_user_id: Option<String>,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub created_at: String,
}

/// A message about to be appended to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_role: SenderRole,
    pub sender_user_id: Option<String>,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

/// Result of a create-or-resume call.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub conversation: Conversation,
    /// `false` when an existing active conversation was returned.
    pub created: bool,
}

/// Result of the conditional `open -> claimed` update.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This request won the race.
    Claimed(Conversation),
    /// The requesting agent already held the claim.
    AlreadyOwned(Conversation),
    /// The stored status was not `open`; the current row is returned unchanged.
    Rejected(Conversation),
    NotFound,
}

/// Result of a close request.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    Closed {
        conversation: Conversation,
        previous: ConversationStatus,
    },
    AlreadyClosed(Conversation),
    /// Claimed by an agent other than the actor; nothing changed.
    Rejected(Conversation),
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn only_forward_transitions_are_legal() {
        use ConversationStatus::*;
        assert!(Open.can_transition_to(Claimed));
        assert!(Open.can_transition_to(Closed));
        assert!(Claimed.can_transition_to(Closed));
        assert!(!Claimed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Claimed));
        assert!(!Open.can_transition_to(Open));
    }

    #[test]
    fn status_string_round_trip_is_snake_case() {
        assert_eq!(ConversationStatus::Claimed.to_string(), "claimed");
        assert_eq!(
            ConversationStatus::from_str("open").unwrap(),
            ConversationStatus::Open
        );
        assert_eq!(SenderRole::Guest.to_string(), "guest");
        assert_eq!(Role::from_str("support").unwrap(), Role::Support);
    }

    #[test]
    fn guest_identity_debug_is_redacted() {
        let id = Identity::Guest {
            token: "super-secret-guest-token".into(),
        };
        let out = format!("{id:?}");
        assert!(!out.contains("super-secret"));
        assert!(out.contains("[redacted]"));
    }

    #[test]
    fn sender_roles_map_to_sides() {
        assert_eq!(SenderRole::Guest.side(), Side::Customer);
        assert_eq!(SenderRole::Customer.side(), Side::Customer);
        assert_eq!(SenderRole::Support.side(), Side::Support);
    }

    #[test]
    fn queued_requires_open_and_unassigned() {
        let mut conv = Conversation {
            id: ConversationId("c1".into()),
            originator: Identity::Guest { token: "g1".into() },
            status: ConversationStatus::Open,
            assigned_agent_id: None,
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: "2026-01-01T00:00:00.000Z".into(),
            closed_at: None,
            closed_by: None,
        };
        assert!(conv.is_queued());
        conv.status = ConversationStatus::Claimed;
        conv.assigned_agent_id = Some("a1".into());
        assert!(!conv.is_queued());
        assert!(conv.is_assigned_to("a1"));
        assert!(!conv.is_assigned_to("a2"));
    }
}
