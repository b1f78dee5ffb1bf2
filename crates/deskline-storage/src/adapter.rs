// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the StorageAdapter trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use deskline_config::model::StorageConfig;
use deskline_core::types::{
    ClaimOutcome, CloseOutcome, Conversation, ConversationId, Identity, Message, NewMessage,
    StartOutcome,
};
use deskline_core::{AdapterType, DesklineError, HealthStatus, PluginAdapter, StorageAdapter};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Delegates every operation to the `queries` modules over one [`Database`]
/// handle. The database is opened lazily by [`StorageAdapter::initialize`];
/// every other call fails with a storage error until then.
pub struct SqliteStorage {
    /// Path and journal settings.
    config: StorageConfig,
    /// Set once by `initialize`.
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create an adapter for `config` without touching the disk.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// The open database, or a storage error before `initialize`.
    fn db(&self) -> Result<&Database, DesklineError> {
        self.db.get().ok_or_else(|| DesklineError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row("SELECT 1", [], |row| row.get(0))
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), DesklineError> {
        let path = self.config.database_path.clone();
        let db = Database::open_with_options(&path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| DesklineError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    /// Checkpoints the WAL so the main database file is self-contained.
    async fn close(&self) -> Result<(), DesklineError> {
        self.db()?.checkpoint().await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    // --- Conversation operations ---

    async fn start_conversation(
        &self,
        originator: &Identity,
        force_new: bool,
    ) -> Result<StartOutcome, DesklineError> {
        queries::conversations::start_conversation(self.db()?, originator, force_new).await
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, DesklineError> {
        queries::conversations::get_conversation(self.db()?, id).await
    }

    async fn claim_conversation(
        &self,
        id: &ConversationId,
        agent_id: &str,
    ) -> Result<ClaimOutcome, DesklineError> {
        queries::conversations::claim_conversation(self.db()?, id, agent_id).await
    }

    async fn close_conversation(
        &self,
        id: &ConversationId,
        actor_id: &str,
    ) -> Result<CloseOutcome, DesklineError> {
        queries::conversations::close_conversation(self.db()?, id, actor_id).await
    }

    async fn list_queued(&self) -> Result<Vec<Conversation>, DesklineError> {
        queries::conversations::list_queued(self.db()?).await
    }

    async fn list_claimed_by(&self, agent_id: &str) -> Result<Vec<Conversation>, DesklineError> {
        queries::conversations::list_claimed_by(self.db()?, agent_id).await
    }

    async fn link_guest(
        &self,
        guest_token: &str,
        user_id: &str,
    ) -> Result<Vec<Conversation>, DesklineError> {
        queries::conversations::link_guest(self.db()?, guest_token, user_id).await
    }

    // --- Message operations ---

    async fn insert_message(&self, msg: &NewMessage) -> Result<Message, DesklineError> {
        queries::messages::insert_message(self.db()?, msg).await
    }

    async fn get_messages(
        &self,
        conversation_id: &ConversationId,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, DesklineError> {
        queries::messages::get_messages(self.db()?, conversation_id, limit).await
    }
}
