// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation lifecycle operations.
//!
//! Every status change is a conditional UPDATE evaluated on the single writer
//! thread, so the row itself decides races: a claim only succeeds if the row
//! still says `open` at the moment the UPDATE runs.

use std::str::FromStr;

use deskline_core::types::{
    ClaimOutcome, CloseOutcome, Conversation, ConversationId, ConversationStatus, Identity,
    StartOutcome,
};
use deskline_core::DesklineError;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};

const COLUMNS: &str = "id, customer_user_id, guest_token, status, assigned_agent_id,
                       created_at, updated_at, closed_at, closed_by";

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

/// Map a row selected with [`COLUMNS`] into a [`Conversation`].
///
/// The nullable `customer_user_id` / `guest_token` pair becomes the tagged
/// [`Identity`] here and nowhere else.
pub(crate) fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let customer_user_id: Option<String> = row.get(1)?;
    let guest_token: Option<String> = row.get(2)?;
    let originator = match (customer_user_id, guest_token) {
        (Some(id), None) => Identity::User { id },
        (None, Some(token)) => Identity::Guest { token },
        _ => {
            return Err(conversion_err(
                1,
                "conversation must have exactly one originator".to_string(),
            ))
        }
    };

    let status: String = row.get(3)?;
    let status = ConversationStatus::from_str(&status)
        .map_err(|_| conversion_err(3, format!("unknown conversation status `{status}`")))?;

    Ok(Conversation {
        id: ConversationId(row.get(0)?),
        originator,
        status,
        assigned_agent_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        closed_at: row.get(7)?,
        closed_by: row.get(8)?,
    })
}

fn fetch(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1"),
        params![id],
        conversation_from_row,
    )
    .optional()
}

fn collect(
    conn: &rusqlite::Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, conversation_from_row)?;
    rows.collect()
}

/// Return the originator's most recent active conversation, or insert a new one.
pub async fn start_conversation(
    db: &Database,
    originator: &Identity,
    force_new: bool,
) -> Result<StartOutcome, DesklineError> {
    let user_id = originator.user_id().map(str::to_string);
    let guest_token = originator.guest_token().map(str::to_string);
    let new_id = ConversationId::generate();

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            if !force_new {
                let existing = tx
                    .query_row(
                        &format!(
                            "SELECT {COLUMNS} FROM conversations
                             WHERE customer_user_id IS ?1 AND guest_token IS ?2
                               AND status IN ('open', 'claimed')
                             ORDER BY created_at DESC, rowid DESC
                             LIMIT 1"
                        ),
                        params![user_id, guest_token],
                        conversation_from_row,
                    )
                    .optional()?;
                if let Some(conversation) = existing {
                    tx.commit()?;
                    return Ok(StartOutcome {
                        conversation,
                        created: false,
                    });
                }
            }

            tx.execute(
                "INSERT INTO conversations (id, customer_user_id, guest_token, status)
                 VALUES (?1, ?2, ?3, 'open')",
                params![new_id.0, user_id, guest_token],
            )?;
            let conversation = fetch(&tx, &new_id.0)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(StartOutcome {
                conversation,
                created: true,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Get a conversation by id.
pub async fn get_conversation(
    db: &Database,
    id: &ConversationId,
) -> Result<Option<Conversation>, DesklineError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| fetch(conn, &id))
        .await
        .map_err(map_tr_err)
}

/// Atomically move `open -> claimed` for `agent_id`.
pub async fn claim_conversation(
    db: &Database,
    id: &ConversationId,
    agent_id: &str,
) -> Result<ClaimOutcome, DesklineError> {
    let id = id.0.clone();
    let agent_id = agent_id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE conversations
                     SET status = 'claimed', assigned_agent_id = ?2, updated_at = {NOW}
                     WHERE id = ?1 AND status = 'open'"
                ),
                params![id, agent_id],
            )?;

            let outcome = match (changed, fetch(conn, &id)?) {
                (_, None) => ClaimOutcome::NotFound,
                (1, Some(c)) => ClaimOutcome::Claimed(c),
                (_, Some(c)) if c.is_assigned_to(&agent_id) => ClaimOutcome::AlreadyOwned(c),
                (_, Some(c)) => ClaimOutcome::Rejected(c),
            };
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// Move an active conversation to `closed`, recording who closed it.
///
/// A claimed conversation may only be closed by its assignee; the check and
/// the update share one transaction.
pub async fn close_conversation(
    db: &Database,
    id: &ConversationId,
    actor_id: &str,
) -> Result<CloseOutcome, DesklineError> {
    let id = id.0.clone();
    let actor_id = actor_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch(&tx, &id)? else {
                tx.commit()?;
                return Ok(CloseOutcome::NotFound);
            };
            if current.status == ConversationStatus::Closed {
                tx.commit()?;
                return Ok(CloseOutcome::AlreadyClosed(current));
            }
            if current.status == ConversationStatus::Claimed && !current.is_assigned_to(&actor_id) {
                tx.commit()?;
                return Ok(CloseOutcome::Rejected(current));
            }

            tx.execute(
                &format!(
                    "UPDATE conversations
                     SET status = 'closed', closed_at = {NOW}, closed_by = ?2, updated_at = {NOW}
                     WHERE id = ?1 AND status = ?3"
                ),
                params![id, actor_id, current.status.to_string()],
            )?;
            let conversation = fetch(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(CloseOutcome::Closed {
                conversation,
                previous: current.status,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Open conversations with no assignee, oldest first.
pub async fn list_queued(db: &Database) -> Result<Vec<Conversation>, DesklineError> {
    db.connection()
        .call(|conn| {
            collect(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM conversations
                     WHERE status = 'open' AND assigned_agent_id IS NULL
                     ORDER BY created_at ASC, rowid ASC"
                ),
                [],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Conversations currently claimed by `agent_id`, oldest first.
pub async fn list_claimed_by(
    db: &Database,
    agent_id: &str,
) -> Result<Vec<Conversation>, DesklineError> {
    let agent_id = agent_id.to_string();
    db.connection()
        .call(move |conn| {
            collect(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM conversations
                     WHERE status = 'claimed' AND assigned_agent_id = ?1
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![agent_id],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Re-parent all conversations of a guest token onto a user account.
///
/// Sets `customer_user_id` and clears `guest_token` in one statement, so a
/// row never has both or neither. A second call with the same token finds
/// nothing and returns an empty vector.
pub async fn link_guest(
    db: &Database,
    guest_token: &str,
    user_id: &str,
) -> Result<Vec<Conversation>, DesklineError> {
    let guest_token = guest_token.to_string();
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM conversations WHERE guest_token = ?1 ORDER BY created_at, rowid",
                )?;
                let rows = stmt.query_map(params![guest_token], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            if ids.is_empty() {
                tx.commit()?;
                return Ok(Vec::new());
            }

            tx.execute(
                &format!(
                    "UPDATE conversations
                     SET customer_user_id = ?2, guest_token = NULL, updated_at = {NOW}
                     WHERE guest_token = ?1"
                ),
                params![guest_token, user_id],
            )?;

            let mut linked = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(c) = fetch(&tx, id)? {
                    linked.push(c);
                }
            }
            tx.commit()?;
            Ok(linked)
        })
        .await
        .map_err(map_tr_err)
}
