// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message append and history operations.

use std::str::FromStr;

use deskline_core::types::{Attachment, ConversationId, Message, NewMessage, SenderRole};
use deskline_core::{ConflictReason, DesklineError};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};

const COLUMNS: &str = "id, conversation_id, sender_role, sender_user_id, text,
                       attachment_url, attachment_name, created_at";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let sender_role = SenderRole::from_str(&role).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown sender role `{role}`").into(),
        )
    })?;

    let url: Option<String> = row.get(5)?;
    let name: Option<String> = row.get(6)?;
    let attachment = match (url, name) {
        (Some(url), Some(name)) => Some(Attachment { url, name }),
        _ => None,
    };

    Ok(Message {
        id: row.get(0)?,
        conversation_id: ConversationId(row.get(1)?),
        sender_role,
        sender_user_id: row.get(3)?,
        text: row.get(4)?,
        attachment,
        created_at: row.get(7)?,
    })
}

/// Append a message, assigning its id and timestamp.
///
/// The insert is conditional on the conversation existing and not being
/// closed, evaluated in the same statement, so a message can never land
/// after a close has committed.
pub async fn insert_message(db: &Database, msg: &NewMessage) -> Result<Message, DesklineError> {
    let msg = msg.clone();
    let inserted = db
        .connection()
        .call(move |conn| {
            let (url, name) = match &msg.attachment {
                Some(a) => (Some(a.url.clone()), Some(a.name.clone())),
                None => (None, None),
            };
            let changed = conn.execute(
                "INSERT INTO messages
                     (conversation_id, sender_role, sender_user_id, text, attachment_url, attachment_name)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6
                 WHERE EXISTS (
                     SELECT 1 FROM conversations WHERE id = ?1 AND status <> 'closed'
                 )",
                params![
                    msg.conversation_id.0,
                    msg.sender_role.to_string(),
                    msg.sender_user_id,
                    msg.text,
                    url,
                    name,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                message_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;

    inserted.ok_or(DesklineError::Conflict(ConflictReason::ConversationClosed))
}

/// History of a conversation in ascending id order.
///
/// With a limit, returns the most recent `limit` messages (still ascending).
pub async fn get_messages(
    db: &Database,
    conversation_id: &ConversationId,
    limit: Option<i64>,
) -> Result<Vec<Message>, DesklineError> {
    let conversation_id = conversation_id.0.clone();
    db.connection()
        .call(move |conn| {
            let mut messages = Vec::new();
            match limit {
                Some(lim) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM (
                             SELECT {COLUMNS} FROM messages WHERE conversation_id = ?1
                             ORDER BY id DESC LIMIT ?2
                         ) ORDER BY id ASC"
                    ))?;
                    let rows = stmt.query_map(params![conversation_id, lim], message_from_row)?;
                    for row in rows {
                        messages.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM messages WHERE conversation_id = ?1
                         ORDER BY id ASC"
                    ))?;
                    let rows = stmt.query_map(params![conversation_id], message_from_row)?;
                    for row in rows {
                        messages.push(row?);
                    }
                }
            }
            Ok(messages)
        })
        .await
        .map_err(map_tr_err)
}
