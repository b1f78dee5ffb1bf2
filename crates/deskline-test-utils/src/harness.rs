// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the chat service over a temp SQLite database.
//! The database is removed when the harness is dropped.

use std::sync::Arc;

use deskline_chat::identity::mint_credential;
use deskline_chat::{Caller, ChatService};
use deskline_config::model::{AuthConfig, ChatConfig, DesklineConfig, StorageConfig};
use deskline_core::types::{Identity, Role};
use deskline_core::{DesklineError, StorageAdapter};
use deskline_storage::SqliteStorage;

use crate::faulty_storage::FaultyStorage;
use crate::mock_connection::MockConnection;

/// Session secret configured on every harness.
pub const TEST_SESSION_SECRET: &str = "deskline-test-secret-0123456789abcdef";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    chat: ChatConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            chat: ChatConfig::default(),
        }
    }

    pub fn allow_multiple_conversations(mut self, allow: bool) -> Self {
        self.chat.allow_multiple_conversations = allow;
        self
    }

    pub fn history_limit(mut self, limit: i64) -> Self {
        self.chat.history_limit = limit;
        self
    }

    pub fn connection_buffer(mut self, capacity: usize) -> Self {
        self.chat.connection_buffer = capacity;
        self
    }

    pub fn max_message_length(mut self, len: usize) -> Self {
        self.chat.max_message_length = len;
        self
    }

    /// Build the harness, opening storage and rebuilding the (empty) queue.
    pub async fn build(self) -> Result<TestHarness, DesklineError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| DesklineError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");

        let config = DesklineConfig {
            storage: StorageConfig {
                database_path: db_path.to_string_lossy().into_owned(),
                wal_mode: true,
            },
            auth: AuthConfig {
                session_secret: Some(TEST_SESSION_SECRET.to_string()),
                ..AuthConfig::default()
            },
            chat: self.chat,
            ..DesklineConfig::default()
        };

        let sqlite = SqliteStorage::new(config.storage.clone());
        sqlite.initialize().await?;
        let faults = Arc::new(FaultyStorage::new(Arc::new(sqlite)));
        let storage: Arc<dyn StorageAdapter> = faults.clone();

        let service = Arc::new(ChatService::new(
            storage.clone(),
            &config.chat,
            &config.auth,
        ));
        service.rebuild_queue().await?;

        Ok(TestHarness {
            service,
            storage,
            faults,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete chat stack on temp storage.
pub struct TestHarness {
    pub service: Arc<ChatService>,
    /// SQLite storage adapter (temp DB, cleaned up on drop), seen through `faults`.
    pub storage: Arc<dyn StorageAdapter>,
    /// Fault switches on the storage the service uses. Off by default.
    pub faults: Arc<FaultyStorage>,
    pub config: DesklineConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with default settings.
    pub async fn new() -> Result<Self, DesklineError> {
        Self::builder().build().await
    }

    pub fn guest(token: &str) -> Caller {
        Caller::Visitor(Identity::Guest {
            token: token.to_string(),
        })
    }

    pub fn customer(user_id: &str) -> Caller {
        Caller::Visitor(Identity::User {
            id: user_id.to_string(),
        })
    }

    pub fn agent(agent_id: &str) -> Caller {
        Caller::Agent(agent_id.to_string())
    }

    /// A session credential valid for one hour.
    pub fn credential(&self, user_id: &str, role: Role) -> Result<String, DesklineError> {
        let expires_at = chrono::Utc::now().timestamp() + 3600;
        mint_credential(TEST_SESSION_SECRET.as_bytes(), user_id, role, expires_at)
    }

    /// Register a mock connection for `caller`.
    pub async fn connect(&self, caller: Caller) -> Result<MockConnection, DesklineError> {
        let conn = self.service.connect(caller).await?;
        Ok(MockConnection::new(self.service.clone(), conn))
    }

    /// Resolve credentials the way a transport would, then connect.
    pub async fn connect_with(
        &self,
        credential: Option<&str>,
        guest_token: Option<&str>,
    ) -> Result<MockConnection, DesklineError> {
        let caller = self.service.authenticate(credential, guest_token).await?;
        self.connect(caller).await
    }
}
