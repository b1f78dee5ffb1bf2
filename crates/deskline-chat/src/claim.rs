// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation state transitions.
//!
//! The coordinator is the only writer of the queue working set. Each
//! transition commits to the store first; the queue and rooms are updated
//! only after the store reports success, so a failed write leaves them
//! untouched.

use std::sync::Arc;

use deskline_core::types::{
    ClaimOutcome, CloseOutcome, Conversation, ConversationId, ConversationStatus, Identity,
    StartOutcome,
};
use deskline_core::{ConflictReason, DesklineError, StorageAdapter};
use tracing::{info, warn};

use crate::events::{ConversationView, QueueChange, ServerEvent};
use crate::queue::QueueBroadcaster;
use crate::rooms::{ConnectionId, RoomRouter};

/// Result of a successful claim.
#[derive(Debug, Clone)]
pub struct Claimed {
    pub conversation: Conversation,
    /// Agent connections bound into the room.
    pub connections: Vec<ConnectionId>,
}

pub struct ClaimCoordinator {
    storage: Arc<dyn StorageAdapter>,
    queue: Arc<QueueBroadcaster>,
    rooms: Arc<RoomRouter>,
}

impl ClaimCoordinator {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        queue: Arc<QueueBroadcaster>,
        rooms: Arc<RoomRouter>,
    ) -> Self {
        Self {
            storage,
            queue,
            rooms,
        }
    }

    /// Create or resume the originator's conversation.
    ///
    /// Only a newly created conversation is announced to the queue. A resumed
    /// one is either already queued or has since left the queue, and the row
    /// read by the resume may be stale by the time it returns.
    ///
    /// The store call and the announcement run on their own task so a dropped
    /// request cannot commit a conversation without queueing it.
    pub async fn start(
        &self,
        originator: &Identity,
        force_new: bool,
    ) -> Result<StartOutcome, DesklineError> {
        let storage = self.storage.clone();
        let queue = self.queue.clone();
        let originator = originator.clone();
        tokio::spawn(async move {
            let outcome = storage.start_conversation(&originator, force_new).await?;
            if outcome.created {
                info!(conversation_id = %outcome.conversation.id, "conversation opened");
                queue.opened(&outcome.conversation);
            }
            Ok::<_, DesklineError>(outcome)
        })
        .await
        .map_err(|e| DesklineError::Internal(format!("conversation start task failed: {e}")))?
    }

    /// Compare-and-set `open -> claimed` for `agent_id`.
    ///
    /// Losing the race yields `Conflict(AlreadyClaimed)`; targeting a closed
    /// conversation yields `Conflict(ConversationClosed)`; an unknown id
    /// yields `NotFound`. A repeat claim by the current assignee succeeds.
    pub async fn claim(
        &self,
        agent_id: &str,
        id: &ConversationId,
    ) -> Result<Claimed, DesklineError> {
        let conversation = match self.storage.claim_conversation(id, agent_id).await? {
            ClaimOutcome::Claimed(c) => {
                info!(conversation_id = %id, agent_id, "conversation claimed");
                self.queue
                    .removed(&c, ConversationStatus::Open, QueueChange::Claimed);
                c
            }
            ClaimOutcome::AlreadyOwned(c) => c,
            ClaimOutcome::Rejected(c) => {
                warn!(conversation_id = %id, agent_id, status = %c.status, "claim rejected");
                return Err(match (c.status, c.assigned_agent_id) {
                    (ConversationStatus::Closed, _) => {
                        DesklineError::Conflict(ConflictReason::ConversationClosed)
                    }
                    (_, Some(holder)) => {
                        DesklineError::Conflict(ConflictReason::AlreadyClaimed { agent_id: holder })
                    }
                    (_, None) => DesklineError::Internal(format!(
                        "conversation {id} rejected a claim while unassigned"
                    )),
                });
            }
            ClaimOutcome::NotFound => {
                return Err(DesklineError::NotFound(format!("conversation {id}")));
            }
        };

        let connections = self.rooms.join_agent(agent_id, &conversation);
        Ok(Claimed {
            conversation,
            connections,
        })
    }

    /// Move a conversation to `closed` on behalf of `agent_id`.
    ///
    /// Every room member receives `conversation_closed`.
    pub async fn close(
        &self,
        agent_id: &str,
        id: &ConversationId,
    ) -> Result<Conversation, DesklineError> {
        let (conversation, previous) = match self.storage.close_conversation(id, agent_id).await? {
            CloseOutcome::Closed {
                conversation,
                previous,
            } => (conversation, previous),
            CloseOutcome::AlreadyClosed(_) => {
                return Err(DesklineError::Conflict(ConflictReason::ConversationClosed));
            }
            CloseOutcome::Rejected(_) => {
                warn!(conversation_id = %id, agent_id, "close rejected: not the assignee");
                return Err(DesklineError::Forbidden(
                    "only the assigned agent may close a claimed conversation".to_string(),
                ));
            }
            CloseOutcome::NotFound => {
                return Err(DesklineError::NotFound(format!("conversation {id}")));
            }
        };

        info!(conversation_id = %id, agent_id, previous = %previous, "conversation closed");
        if previous == ConversationStatus::Open {
            self.queue
                .removed(&conversation, previous, QueueChange::Closed);
        }
        self.rooms.mark_closed(id);
        self.rooms.broadcast(
            id,
            ServerEvent::ConversationClosed {
                conversation: ConversationView::from(&conversation),
            },
        );
        Ok(conversation)
    }
}
