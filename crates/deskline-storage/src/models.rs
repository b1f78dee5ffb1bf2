// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types live in `deskline-core::types` so they can cross the
//! adapter trait boundary; they are re-exported here for convenience.

pub use deskline_core::types::{
    Attachment, Conversation, ConversationId, ConversationStatus, Identity, Message, NewMessage,
};
