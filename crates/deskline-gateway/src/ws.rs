// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket handler for the real-time channel.
//!
//! Client -> Server (JSON):
//! ```json
//! {"type": "message_send", "requestId": "r1", "conversationId": "...", "text": "hi"}
//! ```
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "ack", "requestId": "r1", "ok": true, "data": {...}}
//! {"type": "message_new", "message": {...}}
//! ```
//!
//! The caller is resolved before the upgrade. Browsers cannot set headers
//! on a WebSocket handshake, so `?token=` and `?guest=` are accepted as well.

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use deskline_chat::{Caller, ClientFrame, Connection, ServerEvent};
use deskline_core::DesklineError;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::auth::credentials_from_headers;
use crate::handlers::ApiError;
use crate::server::GatewayState;

/// Handshake query parameters.
#[derive(Default, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub guest: Option<String>,
}

/// WebSocket upgrade handler.
///
/// Rejects the handshake with a JSON error when the caller cannot be
/// resolved; otherwise upgrades and spawns the connection handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let presented = credentials_from_headers(&headers);
    let credential = presented.credential.or(params.token);
    let guest_token = presented.guest_token.or(params.guest);

    let caller = match state
        .service
        .authenticate(credential.as_deref(), guest_token.as_deref())
        .await
    {
        Ok(caller) => caller,
        Err(e) => return ApiError::from(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, caller))
}

/// Recover `requestId` from a frame that failed to decode, so the error ack
/// can still be correlated.
fn request_id_of(text: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("requestId")?
        .as_str()
        .map(str::to_string)
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> Result<ClientFrame, ServerEvent> {
    serde_json::from_str(text).map_err(|e| {
        ServerEvent::ack_err(
            request_id_of(text),
            &DesklineError::Validation(format!("malformed frame: {e}")),
        )
    })
}

/// Handle an individual WebSocket connection.
///
/// Spawns a writer task that drains the connection's event channel into the
/// socket, then reads client frames until the socket closes or the server
/// shuts down. Acks travel through the same channel as events, so a client
/// sees them in the order the server produced them.
async fn handle_socket(socket: WebSocket, state: GatewayState, caller: Caller) {
    let Connection { id, mut events } = match state.service.connect(caller).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(error = %e, "failed to register connection");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let done = CancellationToken::new();
    let writer_done = done.clone();
    let shutdown = state.shutdown.clone();

    let mut sender_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    break;
                }
                _ = writer_done.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "dropping unencodable event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let msg = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = &mut sender_task => break,
            msg = ws_receiver.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                let ack = match decode_frame(text.as_str()) {
                    Ok(frame) => state.service.handle_frame(id, frame).await,
                    Err(ack) => {
                        tracing::warn!(connection_id = %id, "malformed frame");
                        ack
                    }
                };
                if !state.service.send_to(id, ack) {
                    tracing::warn!(connection_id = %id, "ack not delivered");
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {} // binary and ping/pong are not part of the protocol
            Some(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "socket read failed");
                break;
            }
        }
    }

    state.service.disconnect(id);
    if !state.shutdown.is_cancelled() {
        done.cancel();
    }
    if !sender_task.is_finished() {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), &mut sender_task).await;
        sender_task.abort();
    }
}
