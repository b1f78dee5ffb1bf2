// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The chat service: one façade over identity, queue, claims, rooms and the
//! message channel, shared by the real-time and REST transports.
//!
//! Per-conversation ordering: every operation that appends to a
//! conversation's history or hands history to a new room member holds that
//! conversation's send lock from the store write until the fan-out is
//! queued. Delivery order is therefore storage order, and a member never
//! misses or double-receives a message around its join.

use std::sync::Arc;

use dashmap::DashMap;
use deskline_config::model::{AuthConfig, ChatConfig};
use deskline_core::types::{
    Attachment, Conversation, ConversationId, ConversationStatus, Identity, Message, MessageId,
    NewMessage,
};
use deskline_core::{DesklineError, StorageAdapter};
use serde::Serialize;
use tokio::sync::{OwnedMutexGuard, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::claim::ClaimCoordinator;
use crate::events::{
    ClientEvent, ClientFrame, ConversationView, MessageView, ServerEvent,
};
use crate::identity::{Caller, IdentityResolver, Resolved};
use crate::linking::GuestLinker;
use crate::queue::{QueueBroadcaster, QueueEvent};
use crate::rooms::{ConnectionId, RoomRouter};

/// A registered live connection and the stream of events addressed to it.
pub struct Connection {
    pub id: ConnectionId,
    pub events: mpsc::Receiver<ServerEvent>,
}

pub struct ChatService {
    config: ChatConfig,
    resolver: IdentityResolver,
    storage: Arc<dyn StorageAdapter>,
    queue: Arc<QueueBroadcaster>,
    rooms: Arc<RoomRouter>,
    coordinator: ClaimCoordinator,
    linker: GuestLinker,
    send_locks: SendLocks,
}

type SendLocks = DashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>;

/// Held send lock of one conversation.
///
/// Dropping it removes the map entry unless another task still holds or
/// waits on the same lock, so the map only tracks contended conversations.
struct SendGuard<'a> {
    locks: &'a SendLocks,
    id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Option<serde_json::Value>, DesklineError> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| DesklineError::Internal(format!("failed to encode ack data: {e}")))
}

fn require_agent(caller: &Caller) -> Result<&str, DesklineError> {
    caller
        .agent_id()
        .ok_or_else(|| DesklineError::Forbidden("support agents only".to_string()))
}

/// Owner of the conversation, or the agent it is (or was) assigned to.
fn authorize_participant(caller: &Caller, conversation: &Conversation) -> Result<(), DesklineError> {
    let allowed = match caller {
        Caller::Visitor(identity) => conversation.is_owned_by(identity),
        Caller::Agent(id) => conversation.assigned_agent_id.as_deref() == Some(id.as_str()),
    };
    if allowed {
        Ok(())
    } else {
        Err(DesklineError::Forbidden(
            "not a participant of this conversation".to_string(),
        ))
    }
}

/// Participants, plus any agent while the conversation is still waiting.
fn authorize_reader(caller: &Caller, conversation: &Conversation) -> Result<(), DesklineError> {
    if caller.is_agent() && conversation.status == ConversationStatus::Open {
        return Ok(());
    }
    authorize_participant(caller, conversation)
}

fn log_rejection(operation: &str, err: &DesklineError) {
    match err {
        DesklineError::Storage { .. } | DesklineError::Internal(_) => {
            error!(operation, error = %err, "request failed");
        }
        _ => warn!(operation, code = err.code(), "request rejected"),
    }
}

impl ChatService {
    pub fn new(storage: Arc<dyn StorageAdapter>, chat: &ChatConfig, auth: &AuthConfig) -> Self {
        let queue = Arc::new(QueueBroadcaster::new(chat.connection_buffer));
        let rooms = Arc::new(RoomRouter::new());
        Self {
            config: chat.clone(),
            resolver: IdentityResolver::new(auth),
            coordinator: ClaimCoordinator::new(storage.clone(), queue.clone(), rooms.clone()),
            linker: GuestLinker::new(storage.clone(), queue.clone(), rooms.clone()),
            storage,
            queue,
            rooms,
            send_locks: DashMap::new(),
        }
    }

    pub fn queue(&self) -> &QueueBroadcaster {
        &self.queue
    }

    pub fn rooms(&self) -> &RoomRouter {
        &self.rooms
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Reload the queue working set from the store.
    pub async fn rebuild_queue(&self) -> Result<usize, DesklineError> {
        let queued = self.storage.list_queued().await?;
        let count = queued.len();
        self.queue.rebuild(queued);
        info!(count, "queue rebuilt from storage");
        Ok(count)
    }

    async fn lock_conversation(&self, id: &ConversationId) -> SendGuard<'_> {
        // Created first so a cancelled wait still prunes the entry.
        let mut held = SendGuard {
            locks: &self.send_locks,
            id: id.clone(),
            guard: None,
        };
        let lock = self.send_locks.entry(id.clone()).or_default().clone();
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Conversations with a send lock currently held or awaited.
    pub fn locked_conversations(&self) -> usize {
        self.send_locks.len()
    }

    async fn load(&self, id: &ConversationId) -> Result<Conversation, DesklineError> {
        if id.as_str().trim().is_empty() {
            return Err(DesklineError::Validation(
                "conversation id is required".to_string(),
            ));
        }
        self.storage
            .get_conversation(id)
            .await?
            .ok_or_else(|| DesklineError::NotFound(format!("conversation {id}")))
    }

    // --- Identity ---

    /// Resolve presented credentials and admit the caller.
    pub async fn authenticate(
        &self,
        credential: Option<&str>,
        guest_token: Option<&str>,
    ) -> Result<Caller, DesklineError> {
        let resolved = self.resolver.resolve(credential, guest_token)?;
        self.admit(resolved).await
    }

    /// Admit a resolved caller, linking a presented guest token first.
    pub async fn admit(&self, resolved: Resolved) -> Result<Caller, DesklineError> {
        if let (Some(token), Caller::Visitor(Identity::User { id })) =
            (&resolved.link_guest, &resolved.caller)
        {
            self.linker.link(token, id).await?;
        }
        Ok(resolved.caller)
    }

    /// Explicit guest linking for an authenticated customer.
    pub async fn link_guest(
        &self,
        caller: &Caller,
        guest_token: &str,
    ) -> Result<Vec<Conversation>, DesklineError> {
        let Caller::Visitor(Identity::User { id }) = caller else {
            return Err(DesklineError::Forbidden(
                "only signed-in customers can link a guest token".to_string(),
            ));
        };
        self.resolver
            .validate_guest_token(guest_token)
            .map_err(|e| DesklineError::Validation(e.public_message()))?;
        self.linker.link(guest_token, id).await
    }

    // --- Connections ---

    /// Register a live connection.
    ///
    /// Agents immediately receive `active_chats` and `queue_snapshot`, and a
    /// forwarding task relays every later queue change until the connection's
    /// receiver is dropped.
    pub async fn connect(&self, caller: Caller) -> Result<Connection, DesklineError> {
        let (tx, events) = mpsc::channel(self.config.connection_buffer.max(1));

        if let Some(agent_id) = caller.agent_id() {
            let active = self.storage.list_claimed_by(agent_id).await?;
            // Subscribe before reading the snapshot so no change falls in between.
            let updates = self.queue.subscribe();
            let snapshot = self.queue.snapshot();
            let _ = tx.try_send(ServerEvent::ActiveChats {
                conversations: active.iter().map(ConversationView::from).collect(),
            });
            let _ = tx.try_send(ServerEvent::QueueSnapshot {
                conversations: snapshot.iter().map(ConversationView::from).collect(),
            });
            tokio::spawn(forward_queue(updates, tx.clone(), self.queue.clone()));
        }

        let label = caller.log_label();
        let id = self.rooms.register(caller, tx);
        info!(connection_id = %id, caller = %label, "connection opened");
        Ok(Connection { id, events })
    }

    pub fn disconnect(&self, conn: ConnectionId) {
        if self.rooms.unregister(conn) {
            info!(connection_id = %conn, "connection closed");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.rooms.connection_count()
    }

    /// Queue an event for one connection.
    pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        self.rooms.send_to(conn, event)
    }

    // --- Lifecycle ---

    /// Create or resume the caller's conversation.
    pub async fn start_conversation(
        &self,
        caller: &Caller,
        force_new: bool,
    ) -> Result<Conversation, DesklineError> {
        let Caller::Visitor(identity) = caller else {
            return Err(DesklineError::Forbidden(
                "agents cannot start conversations".to_string(),
            ));
        };
        let force_new = force_new && self.config.allow_multiple_conversations;
        let outcome = self.coordinator.start(identity, force_new).await?;
        Ok(outcome.conversation)
    }

    /// Bind `conn` into a conversation's room and send it `chat_joined`.
    pub async fn join_conversation(
        &self,
        conn: ConnectionId,
        id: &ConversationId,
    ) -> Result<Conversation, DesklineError> {
        let caller = self.rooms.caller(conn).ok_or_else(|| {
            DesklineError::Unauthenticated("connection is not registered".to_string())
        })?;
        let conversation = self.load(id).await?;
        authorize_participant(&caller, &conversation)?;

        let _guard = self.lock_conversation(id).await;
        self.rooms.join(conn, &conversation, !caller.is_agent())?;
        self.push_joined(&[conn], &conversation).await?;
        debug!(connection_id = %conn, conversation_id = %id, "joined conversation");
        Ok(conversation)
    }

    /// Send `chat_joined` with history to `conns`. Caller holds the send lock.
    async fn push_joined(
        &self,
        conns: &[ConnectionId],
        conversation: &Conversation,
    ) -> Result<(), DesklineError> {
        if conns.is_empty() {
            return Ok(());
        }
        let history = self
            .storage
            .get_messages(&conversation.id, Some(self.config.history_limit))
            .await?;
        let event = ServerEvent::ChatJoined {
            conversation: ConversationView::from(conversation),
            history: history.iter().map(MessageView::from).collect(),
            read: self.rooms.read_markers(&conversation.id),
        };
        for conn in conns {
            self.rooms.send_to(*conn, event.clone());
        }
        Ok(())
    }

    /// Agent claims a waiting conversation.
    pub async fn claim(
        &self,
        caller: &Caller,
        id: &ConversationId,
    ) -> Result<Conversation, DesklineError> {
        let agent_id = require_agent(caller)?;
        if id.as_str().trim().is_empty() {
            return Err(DesklineError::Validation(
                "conversation id is required".to_string(),
            ));
        }
        let _guard = self.lock_conversation(id).await;
        let claimed = self.coordinator.claim(agent_id, id).await?;
        self.push_joined(&claimed.connections, &claimed.conversation)
            .await?;
        Ok(claimed.conversation)
    }

    /// Agent closes a conversation.
    pub async fn close(
        &self,
        caller: &Caller,
        id: &ConversationId,
    ) -> Result<Conversation, DesklineError> {
        let agent_id = require_agent(caller)?;
        if id.as_str().trim().is_empty() {
            return Err(DesklineError::Validation(
                "conversation id is required".to_string(),
            ));
        }
        let _guard = self.lock_conversation(id).await;
        self.coordinator.close(agent_id, id).await
    }

    /// Current queue, oldest first.
    pub fn queue_snapshot(&self, caller: &Caller) -> Result<Vec<Conversation>, DesklineError> {
        require_agent(caller)?;
        Ok(self.queue.snapshot().as_ref().clone())
    }

    pub async fn get_conversation(
        &self,
        caller: &Caller,
        id: &ConversationId,
    ) -> Result<Conversation, DesklineError> {
        let conversation = self.load(id).await?;
        authorize_reader(caller, &conversation)?;
        Ok(conversation)
    }

    /// Full ordered history.
    pub async fn history(
        &self,
        caller: &Caller,
        id: &ConversationId,
    ) -> Result<Vec<Message>, DesklineError> {
        let conversation = self.load(id).await?;
        authorize_reader(caller, &conversation)?;
        self.storage.get_messages(id, None).await
    }

    // --- Message channel ---

    fn validate_message(
        &self,
        text: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<(Option<String>, Option<Attachment>), DesklineError> {
        let text = text.filter(|t| !t.trim().is_empty());
        if let Some(t) = &text
            && t.chars().count() > self.config.max_message_length
        {
            return Err(DesklineError::Validation(format!(
                "message exceeds {} characters",
                self.config.max_message_length
            )));
        }
        if let Some(a) = &attachment
            && (a.url.trim().is_empty() || a.name.trim().is_empty())
        {
            return Err(DesklineError::Validation(
                "attachment needs both url and name".to_string(),
            ));
        }
        if text.is_none() && attachment.is_none() {
            return Err(DesklineError::Validation(
                "message must have text or an attachment".to_string(),
            ));
        }
        Ok((text, attachment))
    }

    /// Append a message and fan it out to the room.
    ///
    /// `via` is the live connection the message arrived on; it must be a
    /// member of the room. REST sends pass `None` and are authorized as
    /// participants only.
    pub async fn send_message(
        &self,
        caller: &Caller,
        via: Option<ConnectionId>,
        id: &ConversationId,
        text: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<Message, DesklineError> {
        let (text, attachment) = self.validate_message(text, attachment)?;
        let conversation = self.load(id).await?;
        if conversation.status == ConversationStatus::Closed {
            return Err(DesklineError::Conflict(
                deskline_core::ConflictReason::ConversationClosed,
            ));
        }
        authorize_participant(caller, &conversation)?;
        if let Some(conn) = via {
            self.rooms.active_member(conn, id)?;
        }

        let new = NewMessage {
            conversation_id: id.clone(),
            sender_role: caller.sender_role(),
            sender_user_id: caller.sender_user_id().map(str::to_string),
            text,
            attachment,
        };

        let _guard = self.lock_conversation(id).await;
        let message = self.storage.insert_message(&new).await?;
        let side = caller.side();
        if self.rooms.set_typing(id, side, false) {
            self.rooms.relay(
                id,
                side,
                ServerEvent::Typing {
                    conversation_id: id.clone(),
                    role: side,
                    is_typing: false,
                },
            );
        }
        let delivered = self.rooms.broadcast(
            id,
            ServerEvent::MessageNew {
                message: MessageView::from(&message),
            },
        );
        debug!(conversation_id = %id, message_id = message.id, delivered, "message stored");
        Ok(message)
    }

    /// Relay a typing flag to the other side of the room.
    pub fn typing(
        &self,
        conn: ConnectionId,
        id: &ConversationId,
        is_typing: bool,
    ) -> Result<(), DesklineError> {
        let caller = self.rooms.active_member(conn, id)?;
        let side = caller.side();
        self.rooms.set_typing(id, side, is_typing);
        self.rooms.relay(
            id,
            side,
            ServerEvent::Typing {
                conversation_id: id.clone(),
                role: side,
                is_typing,
            },
        );
        Ok(())
    }

    /// Record a read marker and relay it when it advances.
    pub fn mark_read(
        &self,
        conn: ConnectionId,
        id: &ConversationId,
        message_id: MessageId,
    ) -> Result<(), DesklineError> {
        if message_id <= 0 {
            return Err(DesklineError::Validation(
                "message id must be positive".to_string(),
            ));
        }
        let caller = self.rooms.active_member(conn, id)?;
        let side = caller.side();
        if self.rooms.mark_read(id, side, message_id) {
            self.rooms.relay(
                id,
                side,
                ServerEvent::MessageRead {
                    conversation_id: id.clone(),
                    message_id,
                    role: side,
                },
            );
        }
        Ok(())
    }

    // --- Real-time dispatch ---

    /// Handle one inbound frame and build its acknowledgment.
    ///
    /// Errors never escape: they become `ack {ok: false}` for the caller.
    pub async fn handle_frame(&self, conn: ConnectionId, frame: ClientFrame) -> ServerEvent {
        let operation = frame.event.name();
        match self.dispatch(conn, frame.event).await {
            Ok(data) => ServerEvent::ack_ok(frame.request_id, data),
            Err(e) => {
                log_rejection(operation, &e);
                ServerEvent::ack_err(frame.request_id, &e)
            }
        }
    }

    async fn dispatch(
        &self,
        conn: ConnectionId,
        event: ClientEvent,
    ) -> Result<Option<serde_json::Value>, DesklineError> {
        let caller = self.rooms.caller(conn).ok_or_else(|| {
            DesklineError::Unauthenticated("connection is not registered".to_string())
        })?;

        match event {
            ClientEvent::StartConversation { force_new } => {
                let conversation = self.start_conversation(&caller, force_new).await?;
                let conversation = self.join_conversation(conn, &conversation.id).await?;
                to_data(&ConversationView::from(&conversation))
            }
            ClientEvent::JoinConversation { conversation_id } => {
                let conversation = self.join_conversation(conn, &conversation_id).await?;
                to_data(&ConversationView::from(&conversation))
            }
            ClientEvent::MessageSend {
                conversation_id,
                text,
                attachment,
            } => {
                let message = self
                    .send_message(&caller, Some(conn), &conversation_id, text, attachment)
                    .await?;
                to_data(&MessageView::from(&message))
            }
            ClientEvent::Typing {
                conversation_id,
                is_typing,
            } => {
                self.typing(conn, &conversation_id, is_typing)?;
                Ok(None)
            }
            ClientEvent::MessageRead {
                conversation_id,
                message_id,
            } => {
                self.mark_read(conn, &conversation_id, message_id)?;
                Ok(None)
            }
            ClientEvent::QueueRequest {} => {
                let conversations: Vec<ConversationView> = self
                    .queue_snapshot(&caller)?
                    .iter()
                    .map(ConversationView::from)
                    .collect();
                let data = to_data(&conversations)?;
                self.rooms
                    .send_to(conn, ServerEvent::QueueSnapshot { conversations });
                Ok(data)
            }
            ClientEvent::ConversationClaim { conversation_id } => {
                let conversation = self.claim(&caller, &conversation_id).await?;
                to_data(&ConversationView::from(&conversation))
            }
            ClientEvent::ConversationClose { conversation_id } => {
                let conversation = self.close(&caller, &conversation_id).await?;
                to_data(&ConversationView::from(&conversation))
            }
        }
    }
}

/// Relay queue changes to one agent connection until it goes away.
async fn forward_queue(
    mut updates: broadcast::Receiver<QueueEvent>,
    tx: mpsc::Sender<ServerEvent>,
    queue: Arc<QueueBroadcaster>,
) {
    loop {
        let event = tokio::select! {
            _ = tx.closed() => break,
            recv = updates.recv() => recv,
        };
        let outgoing = match event {
            Ok(event) => vec![
                ServerEvent::QueueUpdated {
                    change: event.change,
                    conversation: ConversationView::from(&event.conversation),
                },
                ServerEvent::QueueSnapshot {
                    conversations: event.snapshot.iter().map(ConversationView::from).collect(),
                },
            ],
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "agent fell behind on queue updates, resending snapshot");
                vec![ServerEvent::QueueSnapshot {
                    conversations: queue.snapshot().iter().map(ConversationView::from).collect(),
                }]
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        for event in outgoing {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}
