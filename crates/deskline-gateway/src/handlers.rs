// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the REST facade.
//!
//! The facade is a fallback for clients without an open real-time
//! connection. Every route goes through the same [`ChatService`] operations
//! as the socket, so ordering, authorization and queue effects are shared.
//!
//! [`ChatService`]: deskline_chat::ChatService

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use deskline_chat::events::ErrorBody;
use deskline_chat::{Caller, ConversationView, MessageView};
use deskline_core::types::{Attachment, ConversationId, HealthStatus};
use deskline_core::{DesklineError, PluginAdapter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::server::GatewayState;

/// A [`DesklineError`] rendered as a JSON error response.
#[derive(Debug)]
pub struct ApiError(pub DesklineError);

impl From<DesklineError> for ApiError {
    fn from(e: DesklineError) -> Self {
        ApiError(e)
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DesklineError::Validation(_) => StatusCode::BAD_REQUEST,
            DesklineError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            DesklineError::Forbidden(_) => StatusCode::FORBIDDEN,
            DesklineError::NotFound(_) => StatusCode::NOT_FOUND,
            DesklineError::Conflict(_) => StatusCode::CONFLICT,
            DesklineError::Storage { .. } | DesklineError::Timeout { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DesklineError::Config(_)
            | DesklineError::Channel { .. }
            | DesklineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody::from(&self.0),
        };
        (status, Json(body)).into_response()
    }
}

/// Decode an optional JSON body. An empty body yields the type's default.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError(DesklineError::Validation(format!("malformed request body: {e}"))))
}

/// Response body for GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub connections: usize,
    pub queued: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub force_new: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    #[serde(default)]
    pub guest_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkResponse {
    pub linked: Vec<ConversationView>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "attachmentRef")]
    pub attachment: Option<Attachment>,
}

/// GET /health
///
/// Unauthenticated. Reports `degraded` with 503 when storage fails its check.
pub async fn get_health(State(state): State<GatewayState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = match state.service.storage().health_check().await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "ok"),
        Ok(_) | Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.health.start_time.elapsed().as_secs(),
            connections: state.service.connection_count(),
            queued: state.service.queue().len(),
        }),
    )
}

/// POST /chat/start
pub async fn post_start(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Result<Json<ConversationView>, ApiError> {
    let request: StartRequest = parse_body(&body)?;
    let conversation = state
        .service
        .start_conversation(&caller, request.force_new)
        .await?;
    Ok(Json(ConversationView::from(&conversation)))
}

/// GET /chat/queue (agents)
pub async fn get_queue(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let queue = state.service.queue_snapshot(&caller)?;
    Ok(Json(queue.iter().map(ConversationView::from).collect()))
}

/// POST /chat/link
pub async fn post_link(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Result<Json<LinkResponse>, ApiError> {
    let request: LinkRequest = parse_body(&body)?;
    let linked = state
        .service
        .link_guest(&caller, &request.guest_token)
        .await?;
    Ok(Json(LinkResponse {
        linked: linked.iter().map(ConversationView::from).collect(),
    }))
}

/// GET /chat/{id}
pub async fn get_conversation(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let conversation = state
        .service
        .get_conversation(&caller, &ConversationId(id))
        .await?;
    Ok(Json(ConversationView::from(&conversation)))
}

/// GET /chat/{id}/messages
pub async fn get_messages(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let history = state.service.history(&caller, &ConversationId(id)).await?;
    Ok(Json(history.iter().map(MessageView::from).collect()))
}

/// POST /chat/{id}/message
///
/// Stored and fanned out to live room members exactly like a socket send.
pub async fn post_message(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let request: MessageRequest = parse_body(&body)?;
    let message = state
        .service
        .send_message(
            &caller,
            None,
            &ConversationId(id),
            request.text,
            request.attachment,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(MessageView::from(&message))))
}

/// POST /chat/{id}/claim (agents)
pub async fn post_claim(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let conversation = state.service.claim(&caller, &ConversationId(id)).await?;
    Ok(Json(ConversationView::from(&conversation)))
}

/// POST /chat/{id}/close (agents)
pub async fn post_close(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let conversation = state.service.close(&caller, &ConversationId(id)).await?;
    Ok(Json(ConversationView::from(&conversation)))
}
