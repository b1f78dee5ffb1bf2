// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock connection for deterministic testing.
//!
//! Events addressed to the connection are captured from the same `mpsc`
//! channel the WebSocket writer drains. Dropping the mock disconnects it.

use std::sync::Arc;
use std::time::Duration;

use deskline_chat::events::ErrorBody;
use deskline_chat::{ChatService, ClientEvent, ClientFrame, ConnectionId, Connection, ServerEvent};
use tokio::sync::mpsc;

/// How long `next_event` waits before giving up.
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MockConnection {
    pub id: ConnectionId,
    service: Arc<ChatService>,
    events: mpsc::Receiver<ServerEvent>,
    next_request: u64,
}

impl MockConnection {
    pub fn new(service: Arc<ChatService>, conn: Connection) -> Self {
        Self {
            id: conn.id,
            service,
            events: conn.events,
            next_request: 0,
        }
    }

    /// Send one client event and return its ack.
    pub async fn request(&mut self, event: ClientEvent) -> ServerEvent {
        self.next_request += 1;
        let frame = ClientFrame {
            request_id: Some(format!("req-{}", self.next_request)),
            event,
        };
        self.service.handle_frame(self.id, frame).await
    }

    /// Send one client event, splitting the ack into data or error.
    pub async fn call(
        &mut self,
        event: ClientEvent,
    ) -> Result<Option<serde_json::Value>, ErrorBody> {
        match self.request(event).await {
            ServerEvent::Ack {
                ok: true, data, ..
            } => Ok(data),
            ServerEvent::Ack {
                error: Some(error), ..
            } => Err(error),
            other => Err(ErrorBody {
                code: "unexpected".to_string(),
                message: format!("expected ack, got {other:?}"),
                retryable: false,
            }),
        }
    }

    /// Next event, or `None` after a timeout.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip events until one matches `pred`; `None` on timeout.
    pub async fn expect_event(
        &mut self,
        pred: impl Fn(&ServerEvent) -> bool,
    ) -> Option<ServerEvent> {
        loop {
            let event = self.next_event().await?;
            if pred(&event) {
                return Some(event);
            }
        }
    }

    /// An already-queued event, without waiting.
    pub fn try_next(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }

    /// All already-queued events.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Whether nothing arrives within `window`.
    pub async fn is_quiet(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.events.recv())
            .await
            .is_err()
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.service.disconnect(self.id);
    }
}
