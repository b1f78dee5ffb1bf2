// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory working set of waiting conversations, broadcast to agents.
//!
//! The set is a projection of the conversation store: callers only mutate it
//! after the corresponding durable write has committed. Each mutation and its
//! broadcast happen under one lock, so every subscriber sees changes in the
//! order they were applied and each event carries the snapshot it produced.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use deskline_core::types::{Conversation, ConversationId, ConversationStatus};
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::QueueChange;

/// One applied queue mutation.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub change: QueueChange,
    pub conversation: Conversation,
    /// Queue contents right after this change, oldest first.
    pub snapshot: Arc<Vec<Conversation>>,
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<ConversationId, Conversation>,
    /// Ids whose claim or close was applied before their creation was
    /// announced. The pending `opened` consumes the id, so the set only holds
    /// announcements still in flight.
    retired: HashSet<ConversationId>,
}

impl QueueState {
    fn snapshot(&self) -> Arc<Vec<Conversation>> {
        let mut items: Vec<Conversation> = self.entries.values().cloned().collect();
        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Arc::new(items)
    }
}

pub struct QueueBroadcaster {
    state: Mutex<QueueState>,
    tx: broadcast::Sender<QueueEvent>,
}

impl QueueBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(QueueState::default()),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to every subsequent queue change.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Replace the working set with `queued`, typically read from the store on startup.
    pub fn rebuild(&self, queued: Vec<Conversation>) {
        let mut state = self.lock();
        state.entries = queued
            .into_iter()
            .filter(Conversation::is_queued)
            .map(|c| (c.id.clone(), c))
            .collect();
        state.retired.clear();
        debug!(count = state.entries.len(), "queue rebuilt");
    }

    /// A conversation was created open and unassigned.
    ///
    /// Called once per conversation, right after its creation commits.
    pub fn opened(&self, conversation: &Conversation) {
        if !conversation.is_queued() {
            return;
        }
        let mut state = self.lock();
        if state.retired.remove(&conversation.id) {
            debug!(conversation_id = %conversation.id, "ignoring late open of retired conversation");
            return;
        }
        if state.entries.contains_key(&conversation.id) {
            return;
        }
        state
            .entries
            .insert(conversation.id.clone(), conversation.clone());
        self.publish(&state, QueueChange::Opened, conversation.clone());
    }

    /// A conversation left the queue because it was claimed or closed.
    ///
    /// `previous` is the status before the transition. An id that was open
    /// but is not present yet is remembered so its pending `opened` cannot
    /// resurrect it.
    pub fn removed(
        &self,
        conversation: &Conversation,
        previous: ConversationStatus,
        change: QueueChange,
    ) {
        let mut state = self.lock();
        if state.entries.remove(&conversation.id).is_none() {
            if previous == ConversationStatus::Open {
                state.retired.insert(conversation.id.clone());
            }
            return;
        }
        self.publish(&state, change, conversation.clone());
    }

    /// Refresh entries whose originator changed after guest linking.
    pub fn relabeled(&self, conversations: &[Conversation]) {
        let mut state = self.lock();
        for conversation in conversations {
            let Some(entry) = state.entries.get_mut(&conversation.id) else {
                continue;
            };
            *entry = conversation.clone();
            self.publish(&state, QueueChange::Relabeled, conversation.clone());
        }
    }

    fn publish(&self, state: &QueueState, change: QueueChange, conversation: Conversation) {
        let event = QueueEvent {
            change,
            conversation,
            snapshot: state.snapshot(),
        };
        // No subscribers is fine: no agents online.
        let _ = self.tx.send(event);
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Arc<Vec<Conversation>> {
        self.lock().snapshot()
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::types::Identity;

    fn conv(id: &str, created_at: &str) -> Conversation {
        Conversation {
            id: ConversationId(id.into()),
            originator: Identity::Guest {
                token: format!("token-{id}"),
            },
            status: ConversationStatus::Open,
            assigned_agent_id: None,
            created_at: created_at.into(),
            updated_at: created_at.into(),
            closed_at: None,
            closed_by: None,
        }
    }

    fn claimed(mut c: Conversation, agent: &str) -> Conversation {
        c.status = ConversationStatus::Claimed;
        c.assigned_agent_id = Some(agent.into());
        c
    }

    #[test]
    fn snapshot_is_oldest_first() {
        let q = QueueBroadcaster::new(16);
        q.opened(&conv("b", "2026-01-01T00:00:02.000Z"));
        q.opened(&conv("a", "2026-01-01T00:00:01.000Z"));
        let ids: Vec<_> = q.snapshot().iter().map(|c| c.id.0.clone()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn opened_is_idempotent() {
        let q = QueueBroadcaster::new(16);
        let mut rx = q.subscribe();
        let c = conv("a", "2026-01-01T00:00:01.000Z");
        q.opened(&c);
        q.opened(&c);
        assert_eq!(q.len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn claimed_conversations_are_not_queued() {
        let q = QueueBroadcaster::new(16);
        q.opened(&claimed(conv("a", "t"), "agent"));
        assert!(q.is_empty());
    }

    #[test]
    fn removal_broadcasts_change_with_snapshot() {
        let q = QueueBroadcaster::new(16);
        let a = conv("a", "2026-01-01T00:00:01.000Z");
        let b = conv("b", "2026-01-01T00:00:02.000Z");
        q.opened(&a);
        q.opened(&b);

        let mut rx = q.subscribe();
        q.removed(
            &claimed(a.clone(), "agent"),
            ConversationStatus::Open,
            QueueChange::Claimed,
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.change, QueueChange::Claimed);
        assert_eq!(event.conversation.id, a.id);
        assert_eq!(event.snapshot.len(), 1);
        assert_eq!(event.snapshot[0].id, b.id);
    }

    #[test]
    fn late_open_after_removal_is_ignored() {
        let q = QueueBroadcaster::new(16);
        let a = conv("a", "t");
        q.removed(&a, ConversationStatus::Open, QueueChange::Closed);
        q.opened(&a);
        assert!(!q.contains(&a.id));
        assert!(q.lock().retired.is_empty());
    }

    #[test]
    fn removal_of_present_entry_leaves_no_tombstone() {
        let q = QueueBroadcaster::new(16);
        let a = conv("a", "t");
        q.opened(&a);
        q.removed(&claimed(a.clone(), "agent"), ConversationStatus::Open, QueueChange::Claimed);
        assert!(q.is_empty());
        assert!(q.lock().retired.is_empty());
    }

    #[test]
    fn rebuild_replaces_contents() {
        let q = QueueBroadcaster::new(16);
        q.opened(&conv("stale", "t"));
        q.rebuild(vec![conv("a", "t1"), claimed(conv("b", "t2"), "x")]);
        assert_eq!(q.len(), 1);
        assert!(q.contains(&ConversationId("a".into())));
    }

    #[test]
    fn relabel_updates_only_present_entries() {
        let q = QueueBroadcaster::new(16);
        let a = conv("a", "t");
        q.opened(&a);
        let mut rx = q.subscribe();

        let mut linked = a.clone();
        linked.originator = Identity::User { id: "u1".into() };
        let mut other = conv("zzz", "t");
        other.originator = Identity::User { id: "u1".into() };
        q.relabeled(&[linked, other]);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.change, QueueChange::Relabeled);
        assert_eq!(event.snapshot[0].customer_user_id(), Some("u1"));
        assert!(rx.try_recv().is_err());
    }
}
