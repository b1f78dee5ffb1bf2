// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Real-time wire protocol.
//!
//! Client -> Server (JSON):
//! ```json
//! {"requestId": "r1", "type": "message_send", "conversationId": "...", "text": "hello"}
//! ```
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "message_new", "message": {...}}
//! {"type": "ack", "requestId": "r1", "ok": true, "data": {...}}
//! ```

use deskline_core::types::{
    Attachment, Conversation, ConversationId, ConversationStatus, Message, MessageId, SenderRole,
    Side,
};
use deskline_core::DesklineError;
use serde::{Deserialize, Serialize};

/// One inbound frame: an optional correlation id plus the event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub event: ClientEvent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    StartConversation {
        #[serde(default)]
        force_new: bool,
    },
    JoinConversation {
        conversation_id: ConversationId,
    },
    MessageSend {
        conversation_id: ConversationId,
        #[serde(default)]
        text: Option<String>,
        #[serde(default, alias = "attachmentRef")]
        attachment: Option<Attachment>,
    },
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
    MessageRead {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    QueueRequest {},
    ConversationClaim {
        conversation_id: ConversationId,
    },
    ConversationClose {
        conversation_id: ConversationId,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StartConversation { .. } => "start_conversation",
            ClientEvent::JoinConversation { .. } => "join_conversation",
            ClientEvent::MessageSend { .. } => "message_send",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::MessageRead { .. } => "message_read",
            ClientEvent::QueueRequest {} => "queue_request",
            ClientEvent::ConversationClaim { .. } => "conversation_claim",
            ClientEvent::ConversationClose { .. } => "conversation_close",
        }
    }
}

/// Conversation descriptor as sent to clients.
///
/// The guest token is never included: the originator is either the
/// customer's user id or the literal `"guest"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: ConversationId,
    pub originator: String,
    pub customer_user_id: Option<String>,
    pub status: ConversationStatus,
    pub assigned_agent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
    pub closed_by: Option<String>,
}

impl From<&Conversation> for ConversationView {
    fn from(c: &Conversation) -> Self {
        let customer_user_id = c.customer_user_id().map(str::to_string);
        Self {
            id: c.id.clone(),
            originator: customer_user_id
                .clone()
                .unwrap_or_else(|| "guest".to_string()),
            customer_user_id,
            status: c.status,
            assigned_agent_id: c.assigned_agent_id.clone(),
            created_at: c.created_at.clone(),
            updated_at: c.updated_at.clone(),
            closed_at: c.closed_at.clone(),
            closed_by: c.closed_by.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_role: SenderRole,
    pub sender_user_id: Option<String>,
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub created_at: String,
}

impl From<&Message> for MessageView {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id.clone(),
            sender_role: m.sender_role,
            sender_user_id: m.sender_user_id.clone(),
            text: m.text.clone(),
            attachment_url: m.attachment.as_ref().map(|a| a.url.clone()),
            attachment_name: m.attachment.as_ref().map(|a| a.name.clone()),
            created_at: m.created_at.clone(),
        }
    }
}

/// Last message id each side has reported as seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadMarkers {
    pub customer: Option<MessageId>,
    pub support: Option<MessageId>,
}

impl ReadMarkers {
    pub fn get(&self, side: Side) -> Option<MessageId> {
        match side {
            Side::Customer => self.customer,
            Side::Support => self.support,
        }
    }

    pub(crate) fn slot(&mut self, side: Side) -> &mut Option<MessageId> {
        match side {
            Side::Customer => &mut self.customer,
            Side::Support => &mut self.support,
        }
    }
}

/// What happened to a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueChange {
    Opened,
    Claimed,
    Closed,
    /// The originator label changed after guest linking.
    Relabeled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&DesklineError> for ErrorBody {
    fn from(e: &DesklineError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.public_message(),
            retryable: e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ChatJoined {
        conversation: ConversationView,
        history: Vec<MessageView>,
        read: ReadMarkers,
    },
    MessageNew {
        message: MessageView,
    },
    Typing {
        conversation_id: ConversationId,
        role: Side,
        is_typing: bool,
    },
    MessageRead {
        conversation_id: ConversationId,
        message_id: MessageId,
        role: Side,
    },
    QueueSnapshot {
        conversations: Vec<ConversationView>,
    },
    QueueUpdated {
        change: QueueChange,
        conversation: ConversationView,
    },
    ActiveChats {
        conversations: Vec<ConversationView>,
    },
    ConversationClosed {
        conversation: ConversationView,
    },
    Ack {
        request_id: Option<String>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
}

impl ServerEvent {
    pub fn ack_ok(request_id: Option<String>, data: Option<serde_json::Value>) -> Self {
        ServerEvent::Ack {
            request_id,
            ok: true,
            data,
            error: None,
        }
    }

    pub fn ack_err(request_id: Option<String>, error: &DesklineError) -> Self {
        ServerEvent::Ack {
            request_id,
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn to_json(&self) -> Result<String, DesklineError> {
        serde_json::to_string(self)
            .map_err(|e| DesklineError::Internal(format!("failed to encode event: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::types::Identity;
    use deskline_core::ConflictReason;

    #[test]
    fn client_frame_parses_camel_case_fields() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"requestId":"r1","type":"typing","conversationId":"c1","isTyping":true}"#,
        )
        .unwrap();
        assert_eq!(frame.request_id.as_deref(), Some("r1"));
        assert_eq!(
            frame.event,
            ClientEvent::Typing {
                conversation_id: ConversationId("c1".into()),
                is_typing: true,
            }
        );
    }

    #[test]
    fn request_id_is_optional() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"queue_request"}"#).unwrap();
        assert!(frame.request_id.is_none());
        assert_eq!(frame.event, ClientEvent::QueueRequest {});
    }

    #[test]
    fn start_defaults_force_new_to_false() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"start_conversation"}"#).unwrap();
        assert_eq!(frame.event, ClientEvent::StartConversation { force_new: false });
    }

    #[test]
    fn message_send_accepts_attachment_ref_alias() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"message_send","conversationId":"c1",
                "attachmentRef":{"url":"/u/a.png","name":"a.png"}}"#,
        )
        .unwrap();
        match frame.event {
            ClientEvent::MessageSend {
                text, attachment, ..
            } => {
                assert!(text.is_none());
                assert_eq!(attachment.unwrap().name, "a.png");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"drop_tables"}"#).is_err());
    }

    #[test]
    fn guest_conversation_view_hides_token() {
        let c = Conversation {
            id: ConversationId("c1".into()),
            originator: Identity::Guest {
                token: "secret-guest-token-1".into(),
            },
            status: ConversationStatus::Open,
            assigned_agent_id: None,
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: "2026-01-01T00:00:00.000Z".into(),
            closed_at: None,
            closed_by: None,
        };
        let json = serde_json::to_string(&ConversationView::from(&c)).unwrap();
        assert!(!json.contains("secret-guest-token-1"));
        assert!(json.contains(r#""originator":"guest""#));
        assert!(json.contains(r#""customerUserId":null"#));
        assert!(json.contains(r#""createdAt""#));
    }

    #[test]
    fn server_events_are_tagged_snake_case() {
        let json = ServerEvent::Typing {
            conversation_id: ConversationId("c1".into()),
            role: Side::Support,
            is_typing: true,
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""type":"typing""#));
        assert!(json.contains(r#""conversationId":"c1""#));
        assert!(json.contains(r#""isTyping":true"#));
        assert!(json.contains(r#""role":"support""#));
    }

    #[test]
    fn error_ack_carries_code_and_retryable() {
        let err = DesklineError::Conflict(ConflictReason::AlreadyClaimed {
            agent_id: "a".into(),
        });
        let json = ServerEvent::ack_err(Some("r9".into()), &err)
            .to_json()
            .unwrap();
        assert!(json.contains(r#""requestId":"r9""#));
        assert!(json.contains(r#""ok":false"#));
        assert!(json.contains(r#""code":"already_claimed""#));
        assert!(json.contains(r#""retryable":false"#));
        assert!(!json.contains("data"));
    }
}
