// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Real-time support-chat routing.
//!
//! A visitor opens a conversation, it waits in a queue broadcast to every
//! connected agent, exactly one agent claims it, and the conversation's room
//! then carries messages, typing flags and read markers between the parties.
//! [`ChatService`] composes the pieces and is what transports talk to.

pub mod claim;
pub mod events;
pub mod identity;
pub mod linking;
pub mod queue;
pub mod rooms;
pub mod service;
pub mod shutdown;

pub use events::{ClientEvent, ClientFrame, ConversationView, MessageView, ServerEvent};
pub use identity::{Caller, IdentityResolver, Resolved};
pub use rooms::ConnectionId;
pub use service::{ChatService, Connection};
