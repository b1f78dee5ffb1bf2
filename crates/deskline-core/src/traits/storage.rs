// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait: the durable Conversation Store and Message Store.

use async_trait::async_trait;

use crate::error::DesklineError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    ClaimOutcome, CloseOutcome, Conversation, ConversationId, Identity, Message, NewMessage,
    StartOutcome,
};

/// Durable store for conversations and their messages.
///
/// The store is the single writer of truth for conversation status and
/// assignment. Every status-changing method must be atomic with respect to
/// concurrent callers: in particular [`claim_conversation`] is a conditional
/// update on `status = open`, never a read followed by an unconditional write.
///
/// [`claim_conversation`]: StorageAdapter::claim_conversation
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connection, etc.).
    async fn initialize(&self) -> Result<(), DesklineError>;

    /// Closes the storage backend, flushing pending writes.
    async fn close(&self) -> Result<(), DesklineError>;

    // --- Conversation operations ---

    /// Return the originator's active conversation, or create a new `open` one.
    ///
    /// With `force_new` an existing active conversation is ignored. The lookup
    /// and insert happen atomically so concurrent starts for one identity do
    /// not produce duplicates.
    async fn start_conversation(
        &self,
        originator: &Identity,
        force_new: bool,
    ) -> Result<StartOutcome, DesklineError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, DesklineError>;

    /// Compare-and-set `open -> claimed` for `agent_id`.
    async fn claim_conversation(
        &self,
        id: &ConversationId,
        agent_id: &str,
    ) -> Result<ClaimOutcome, DesklineError>;

    /// Move an `open` or `claimed` conversation to `closed`.
    async fn close_conversation(
        &self,
        id: &ConversationId,
        actor_id: &str,
    ) -> Result<CloseOutcome, DesklineError>;

    /// All conversations that are `open` with no assignee, oldest first.
    async fn list_queued(&self) -> Result<Vec<Conversation>, DesklineError>;

    /// Conversations currently claimed by `agent_id`, oldest first.
    async fn list_claimed_by(&self, agent_id: &str) -> Result<Vec<Conversation>, DesklineError>;

    /// Re-parent every conversation owned by `guest_token` onto `user_id`.
    ///
    /// Returns the conversations that changed; an empty vector means the token
    /// had nothing left to link (already consumed or never used).
    async fn link_guest(
        &self,
        guest_token: &str,
        user_id: &str,
    ) -> Result<Vec<Conversation>, DesklineError>;

    // --- Message operations ---

    /// Append a message. The returned message carries its sequence id.
    async fn insert_message(&self, msg: &NewMessage) -> Result<Message, DesklineError>;

    /// Messages of a conversation in storage order, optionally limited to the
    /// most recent `limit`.
    async fn get_messages(
        &self,
        conversation_id: &ConversationId,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, DesklineError>;
}
