// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation rooms: who receives which event.
//!
//! Membership is an explicit table of connection -> rooms and
//! room -> connections, consulted on every delivery. The table also holds the
//! ephemeral per-side typing flags and read markers of each room; both reset
//! once the last connection of a side leaves.
//!
//! The lock is a plain `std::sync::Mutex` and is never held across an await.
//! Deliveries use `try_send`; recipients are collected under the lock and
//! sent to after it is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use deskline_core::types::{Conversation, ConversationId, ConversationStatus, Identity, Side};
use deskline_core::{ConflictReason, DesklineError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::{ReadMarkers, ServerEvent};
use crate::identity::Caller;

/// Process-unique identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Member {
    caller: Caller,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<ConversationId>,
}

#[derive(Default)]
struct Room {
    members: HashSet<ConnectionId>,
    typing: HashSet<Side>,
    read: ReadMarkers,
    closed: bool,
}

#[derive(Default)]
struct RouterState {
    connections: HashMap<ConnectionId, Member>,
    rooms: HashMap<ConversationId, Room>,
}

type Outbox = Vec<(ConnectionId, mpsc::Sender<ServerEvent>, ServerEvent)>;

impl RouterState {
    fn side_present(&self, room: &Room, side: Side) -> bool {
        room.members.iter().any(|id| {
            self.connections
                .get(id)
                .is_some_and(|m| m.caller.side() == side)
        })
    }

    fn targets(
        &self,
        room: &Room,
        filter: impl Fn(&Member) -> bool,
    ) -> Vec<(ConnectionId, mpsc::Sender<ServerEvent>)> {
        room.members
            .iter()
            .filter_map(|id| {
                let member = self.connections.get(id)?;
                filter(member).then(|| (*id, member.tx.clone()))
            })
            .collect()
    }

    /// Remove `conn` from room `room_id`, resetting the side's ephemeral state
    /// when it was that side's last connection.
    fn leave(&mut self, conn: ConnectionId, side: Side, room_id: &ConversationId, out: &mut Outbox) {
        let Some(mut room) = self.rooms.remove(room_id) else {
            return;
        };
        room.members.remove(&conn);

        if !self.side_present(&room, side) {
            *room.read.slot(side) = None;
            if room.typing.remove(&side) {
                let event = ServerEvent::Typing {
                    conversation_id: room_id.clone(),
                    role: side,
                    is_typing: false,
                };
                for (id, tx) in self.targets(&room, |m| m.caller.side() != side) {
                    out.push((id, tx, event.clone()));
                }
            }
        }

        if !room.members.is_empty() {
            self.rooms.insert(room_id.clone(), room);
        }
    }
}

fn deliver(out: Outbox) -> usize {
    let mut delivered = 0;
    for (id, tx, event) in out {
        match tx.try_send(event) {
            Ok(()) => delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection_id = %id, "connection buffer full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = %id, "connection gone, dropping event");
            }
        }
    }
    delivered
}

#[derive(Default)]
pub struct RoomRouter {
    state: Mutex<RouterState>,
    next_id: AtomicU64,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a live connection and the channel its events are written to.
    pub fn register(&self, caller: Caller, tx: mpsc::Sender<ServerEvent>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().connections.insert(
            id,
            Member {
                caller,
                tx,
                rooms: HashSet::new(),
            },
        );
        id
    }

    /// Drop a connection from every room. Returns `false` if it was unknown.
    pub fn unregister(&self, conn: ConnectionId) -> bool {
        let mut out = Outbox::new();
        {
            let mut state = self.lock();
            let Some(member) = state.connections.remove(&conn) else {
                return false;
            };
            let side = member.caller.side();
            for room_id in &member.rooms {
                state.leave(conn, side, room_id, &mut out);
            }
        }
        deliver(out);
        true
    }

    pub fn caller(&self, conn: ConnectionId) -> Option<Caller> {
        self.lock().connections.get(&conn).map(|m| m.caller.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Put `conn` in the room of `conversation`.
    ///
    /// With `exclusive`, the connection first leaves every other room; that
    /// is how a customer connection stays in one active room at a time.
    pub fn join(
        &self,
        conn: ConnectionId,
        conversation: &Conversation,
        exclusive: bool,
    ) -> Result<ReadMarkers, DesklineError> {
        let mut out = Outbox::new();
        let markers = {
            let mut state = self.lock();
            let Some(member) = state.connections.get(&conn) else {
                return Err(DesklineError::Channel {
                    message: format!("{conn} is not registered"),
                    source: None,
                });
            };
            let side = member.caller.side();

            if exclusive {
                let others: Vec<ConversationId> = member
                    .rooms
                    .iter()
                    .filter(|r| **r != conversation.id)
                    .cloned()
                    .collect();
                for room_id in &others {
                    state.leave(conn, side, room_id, &mut out);
                    if let Some(m) = state.connections.get_mut(&conn) {
                        m.rooms.remove(room_id);
                    }
                }
            }

            if let Some(m) = state.connections.get_mut(&conn) {
                m.rooms.insert(conversation.id.clone());
            }
            let room = state.rooms.entry(conversation.id.clone()).or_default();
            room.members.insert(conn);
            room.closed = conversation.status == ConversationStatus::Closed;
            room.read
        };
        deliver(out);
        Ok(markers)
    }

    /// Join every live connection of `agent_id` to the room of `conversation`.
    pub fn join_agent(&self, agent_id: &str, conversation: &Conversation) -> Vec<ConnectionId> {
        let conns: Vec<ConnectionId> = {
            let state = self.lock();
            state
                .connections
                .iter()
                .filter(|(_, m)| m.caller.agent_id() == Some(agent_id))
                .map(|(id, _)| *id)
                .collect()
        };
        conns
            .into_iter()
            .filter(|conn| self.join(*conn, conversation, false).is_ok())
            .collect()
    }

    /// The caller of `conn`, provided it is a member of an open room.
    pub fn active_member(
        &self,
        conn: ConnectionId,
        conversation_id: &ConversationId,
    ) -> Result<Caller, DesklineError> {
        let state = self.lock();
        let room = state
            .rooms
            .get(conversation_id)
            .filter(|r| r.members.contains(&conn))
            .ok_or_else(|| {
                DesklineError::Forbidden("not a member of this conversation".to_string())
            })?;
        if room.closed {
            return Err(DesklineError::Conflict(ConflictReason::ConversationClosed));
        }
        state
            .connections
            .get(&conn)
            .map(|m| m.caller.clone())
            .ok_or_else(|| DesklineError::Forbidden("connection is not registered".to_string()))
    }

    /// Deliver `event` to every member of the room.
    pub fn broadcast(&self, conversation_id: &ConversationId, event: ServerEvent) -> usize {
        let out: Outbox = {
            let state = self.lock();
            let Some(room) = state.rooms.get(conversation_id) else {
                return 0;
            };
            state
                .targets(room, |_| true)
                .into_iter()
                .map(|(id, tx)| (id, tx, event.clone()))
                .collect()
        };
        deliver(out)
    }

    /// Deliver `event` to the members on the side opposite `from`.
    pub fn relay(&self, conversation_id: &ConversationId, from: Side, event: ServerEvent) -> usize {
        let out: Outbox = {
            let state = self.lock();
            let Some(room) = state.rooms.get(conversation_id) else {
                return 0;
            };
            state
                .targets(room, |m| m.caller.side() != from)
                .into_iter()
                .map(|(id, tx)| (id, tx, event.clone()))
                .collect()
        };
        deliver(out)
    }

    /// Deliver `event` to one connection.
    pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let tx = match self.lock().connections.get(&conn) {
            Some(m) => m.tx.clone(),
            None => return false,
        };
        deliver(vec![(conn, tx, event)]) == 1
    }

    /// Record a typing flag. Returns whether it changed.
    pub fn set_typing(&self, conversation_id: &ConversationId, side: Side, is_typing: bool) -> bool {
        let mut state = self.lock();
        let Some(room) = state.rooms.get_mut(conversation_id) else {
            return false;
        };
        if is_typing {
            room.typing.insert(side)
        } else {
            room.typing.remove(&side)
        }
    }

    /// Advance a side's read marker. Markers never move backwards.
    pub fn mark_read(
        &self,
        conversation_id: &ConversationId,
        side: Side,
        message_id: i64,
    ) -> bool {
        let mut state = self.lock();
        let Some(room) = state.rooms.get_mut(conversation_id) else {
            return false;
        };
        let slot = room.read.slot(side);
        if slot.is_some_and(|current| current >= message_id) {
            return false;
        }
        *slot = Some(message_id);
        true
    }

    pub fn read_markers(&self, conversation_id: &ConversationId) -> ReadMarkers {
        self.lock()
            .rooms
            .get(conversation_id)
            .map(|r| r.read)
            .unwrap_or_default()
    }

    /// Mark a room closed: members stay (they may still read) but sends,
    /// typing and read markers are refused.
    pub fn mark_closed(&self, conversation_id: &ConversationId) {
        if let Some(room) = self.lock().rooms.get_mut(conversation_id) {
            room.closed = true;
            room.typing.clear();
        }
    }

    /// Relabel live connections of a guest after linking. Room memberships
    /// are untouched. Returns the number of connections relabeled.
    pub fn relabel_guest(&self, guest_token: &str, user_id: &str) -> usize {
        let mut state = self.lock();
        let mut count = 0;
        for member in state.connections.values_mut() {
            if let Caller::Visitor(Identity::Guest { token }) = &member.caller
                && token == guest_token
            {
                member.caller = Caller::Visitor(Identity::User {
                    id: user_id.to_string(),
                });
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_member(router: &RoomRouter, conn: ConnectionId, id: &ConversationId) -> bool {
        router
            .lock()
            .rooms
            .get(id)
            .is_some_and(|r| r.members.contains(&conn))
    }

    fn members(router: &RoomRouter, id: &ConversationId) -> Vec<ConnectionId> {
        let mut members: Vec<_> = router
            .lock()
            .rooms
            .get(id)
            .map(|r| r.members.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: ConversationId(id.into()),
            originator: Identity::Guest {
                token: "guest-token-0001".into(),
            },
            status: ConversationStatus::Claimed,
            assigned_agent_id: Some("agent-1".into()),
            created_at: "t".into(),
            updated_at: "t".into(),
            closed_at: None,
            closed_by: None,
        }
    }

    fn guest() -> Caller {
        Caller::Visitor(Identity::Guest {
            token: "guest-token-0001".into(),
        })
    }

    fn connect(router: &RoomRouter, caller: Caller) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (router.register(caller, tx), rx)
    }

    fn typing(id: &str, role: Side, is_typing: bool) -> ServerEvent {
        ServerEvent::Typing {
            conversation_id: ConversationId(id.into()),
            role,
            is_typing,
        }
    }

    #[test]
    fn broadcast_reaches_only_members() {
        let router = RoomRouter::new();
        let (c1, mut rx1) = connect(&router, guest());
        let (_c2, mut rx2) = connect(&router, Caller::Agent("agent-1".into()));
        router.join(c1, &conversation("x"), true).unwrap();

        assert_eq!(router.broadcast(&ConversationId("x".into()), typing("x", Side::Customer, true)), 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn exclusive_join_leaves_previous_room() {
        let router = RoomRouter::new();
        let (c1, _rx) = connect(&router, guest());
        router.join(c1, &conversation("x"), true).unwrap();
        router.join(c1, &conversation("y"), true).unwrap();
        assert!(!is_member(&router, c1, &ConversationId("x".into())));
        assert!(is_member(&router, c1, &ConversationId("y".into())));
    }

    #[test]
    fn agents_accumulate_rooms() {
        let router = RoomRouter::new();
        let (a, _rx) = connect(&router, Caller::Agent("agent-1".into()));
        router.join(a, &conversation("x"), false).unwrap();
        router.join(a, &conversation("y"), false).unwrap();
        assert!(is_member(&router, a, &ConversationId("x".into())));
        assert!(is_member(&router, a, &ConversationId("y".into())));
    }

    #[test]
    fn relay_skips_sender_side() {
        let router = RoomRouter::new();
        let (c, mut crx) = connect(&router, guest());
        let (a, mut arx) = connect(&router, Caller::Agent("agent-1".into()));
        let conv = conversation("x");
        router.join(c, &conv, true).unwrap();
        router.join(a, &conv, false).unwrap();

        router.relay(&conv.id, Side::Customer, typing("x", Side::Customer, true));
        assert!(crx.try_recv().is_err());
        assert!(arx.try_recv().is_ok());
    }

    #[test]
    fn join_agent_binds_every_agent_connection() {
        let router = RoomRouter::new();
        let (a1, _r1) = connect(&router, Caller::Agent("agent-1".into()));
        let (a2, _r2) = connect(&router, Caller::Agent("agent-1".into()));
        let (other, _r3) = connect(&router, Caller::Agent("agent-2".into()));
        let joined = router.join_agent("agent-1", &conversation("x"));
        assert_eq!(joined.len(), 2);
        assert_eq!(members(&router, &ConversationId("x".into())), vec![a1, a2]);
        assert!(!is_member(&router, other, &ConversationId("x".into())));
    }

    #[test]
    fn read_markers_are_monotonic_and_reset_when_side_leaves() {
        let router = RoomRouter::new();
        let (c, _crx) = connect(&router, guest());
        let (a, _arx) = connect(&router, Caller::Agent("agent-1".into()));
        let conv = conversation("x");
        router.join(c, &conv, true).unwrap();
        router.join(a, &conv, false).unwrap();

        assert!(router.mark_read(&conv.id, Side::Customer, 5));
        assert!(!router.mark_read(&conv.id, Side::Customer, 3));
        assert_eq!(router.read_markers(&conv.id).customer, Some(5));

        router.unregister(c);
        assert_eq!(router.read_markers(&conv.id).customer, None);
    }

    #[test]
    fn last_typist_leaving_clears_typing_for_other_side() {
        let router = RoomRouter::new();
        let (c, _crx) = connect(&router, guest());
        let (a, mut arx) = connect(&router, Caller::Agent("agent-1".into()));
        let conv = conversation("x");
        router.join(c, &conv, true).unwrap();
        router.join(a, &conv, false).unwrap();

        assert!(router.set_typing(&conv.id, Side::Customer, true));
        router.unregister(c);
        assert_eq!(arx.try_recv().unwrap(), typing("x", Side::Customer, false));
    }

    #[test]
    fn closed_room_refuses_active_membership() {
        let router = RoomRouter::new();
        let (c, _rx) = connect(&router, guest());
        let conv = conversation("x");
        router.join(c, &conv, true).unwrap();
        assert!(router.active_member(c, &conv.id).is_ok());

        router.mark_closed(&conv.id);
        let err = router.active_member(c, &conv.id).unwrap_err();
        assert_eq!(err.code(), "conversation_closed");
        assert!(is_member(&router, c, &conv.id));
    }

    #[test]
    fn non_member_is_forbidden() {
        let router = RoomRouter::new();
        let (c, _rx) = connect(&router, guest());
        let err = router
            .active_member(c, &ConversationId("x".into()))
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn relabel_guest_keeps_rooms() {
        let router = RoomRouter::new();
        let (c, _rx) = connect(&router, guest());
        let conv = conversation("x");
        router.join(c, &conv, true).unwrap();

        assert_eq!(router.relabel_guest("guest-token-0001", "user-1"), 1);
        assert_eq!(
            router.caller(c),
            Some(Caller::Visitor(Identity::User { id: "user-1".into() }))
        );
        assert!(is_member(&router, c, &conv.id));
        assert_eq!(router.relabel_guest("guest-token-0001", "user-1"), 0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn full_buffer_drops_instead_of_blocking() {
        let router = RoomRouter::new();
        let (tx, _rx) = mpsc::channel(1);
        let c = router.register(guest(), tx);
        let conv = conversation("x");
        router.join(c, &conv, true).unwrap();
        assert_eq!(router.broadcast(&conv.id, typing("x", Side::Support, true)), 1);
        assert_eq!(router.broadcast(&conv.id, typing("x", Side::Support, false)), 0);
        assert!(logs_contain("connection buffer full"));
    }
}
