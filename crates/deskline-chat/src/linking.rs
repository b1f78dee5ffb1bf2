// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Guest linking: re-parent a visitor's conversations onto their account.

use std::sync::Arc;

use deskline_core::types::Conversation;
use deskline_core::{DesklineError, StorageAdapter};
use tracing::info;

use crate::queue::QueueBroadcaster;
use crate::rooms::RoomRouter;

pub struct GuestLinker {
    storage: Arc<dyn StorageAdapter>,
    queue: Arc<QueueBroadcaster>,
    rooms: Arc<RoomRouter>,
}

impl GuestLinker {
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

    /// Link `guest_token` to `user_id`.
    ///
    /// Rooms are keyed by conversation id, so live connections keep their
    /// memberships and are only relabeled. A token with nothing left to link
    /// returns an empty list.
    pub async fn link(
        &self,
        guest_token: &str,
        user_id: &str,
    ) -> Result<Vec<Conversation>, DesklineError> {
        let linked = self.storage.link_guest(guest_token, user_id).await?;
        let relabeled = self.rooms.relabel_guest(guest_token, user_id);
        if !linked.is_empty() {
            self.queue.relabeled(&linked);
            info!(
                user_id,
                conversations = linked.len(),
                connections = relabeled,
                "guest conversations linked"
            );
        }
        Ok(linked)
    }
}
