// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage wrapper with switchable faults.
//!
//! `FaultyStorage` forwards every call to a real adapter. Tests can make
//! writes fail with a transient storage error, or stall a
//! `start_conversation` after it has committed to widen race windows.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use deskline_core::traits::adapter::PluginAdapter;
use deskline_core::traits::storage::StorageAdapter;
use deskline_core::types::{
    AdapterType, ClaimOutcome, CloseOutcome, Conversation, ConversationId, HealthStatus, Identity,
    Message, NewMessage, StartOutcome,
};
use deskline_core::DesklineError;

pub struct FaultyStorage {
    inner: Arc<dyn StorageAdapter>,
    fail_writes: AtomicBool,
    start_delay: Mutex<Option<Duration>>,
}

impl FaultyStorage {
    pub fn new(inner: Arc<dyn StorageAdapter>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            start_delay: Mutex::new(None),
        }
    }

    /// Make every write fail with a retryable storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sleep for `delay` after each committed `start_conversation`.
    pub fn delay_start(&self, delay: Option<Duration>) {
        *self.start_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    fn check_write(&self) -> Result<(), DesklineError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DesklineError::Storage {
                source: Box::new(std::io::Error::other("injected storage failure")),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for FaultyStorage {
    fn name(&self) -> &str {
        "faulty-storage"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, DesklineError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Ok(HealthStatus::Unhealthy("injected storage failure".to_string()));
        }
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), DesklineError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl StorageAdapter for FaultyStorage {
    async fn initialize(&self) -> Result<(), DesklineError> {
        self.inner.initialize().await
    }

    async fn close(&self) -> Result<(), DesklineError> {
        self.inner.close().await
    }

    async fn start_conversation(
        &self,
        originator: &Identity,
        force_new: bool,
    ) -> Result<StartOutcome, DesklineError> {
        self.check_write()?;
        let outcome = self.inner.start_conversation(originator, force_new).await?;
        let delay = *self.start_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(outcome)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, DesklineError> {
        self.inner.get_conversation(id).await
    }

    async fn claim_conversation(
        &self,
        id: &ConversationId,
        agent_id: &str,
    ) -> Result<ClaimOutcome, DesklineError> {
        self.check_write()?;
        self.inner.claim_conversation(id, agent_id).await
    }

    async fn close_conversation(
        &self,
        id: &ConversationId,
        actor_id: &str,
    ) -> Result<CloseOutcome, DesklineError> {
        self.check_write()?;
        self.inner.close_conversation(id, actor_id).await
    }

    async fn list_queued(&self) -> Result<Vec<Conversation>, DesklineError> {
        self.inner.list_queued().await
    }

    async fn list_claimed_by(&self, agent_id: &str) -> Result<Vec<Conversation>, DesklineError> {
        self.inner.list_claimed_by(agent_id).await
    }

    async fn link_guest(
        &self,
        guest_token: &str,
        user_id: &str,
    ) -> Result<Vec<Conversation>, DesklineError> {
        self.check_write()?;
        self.inner.link_guest(guest_token, user_id).await
    }

    async fn insert_message(&self, msg: &NewMessage) -> Result<Message, DesklineError> {
        self.check_write()?;
        self.inner.insert_message(msg).await
    }

    async fn get_messages(
        &self,
        conversation_id: &ConversationId,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, DesklineError> {
        self.inner.get_messages(conversation_id, limit).await
    }
}
