// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caller resolution for the REST facade.
//!
//! Credentials are read from two headers:
//! 1. `Authorization: Bearer <session credential>`
//! 2. `X-Guest-Token: <guest token>`
//!
//! Requests presenting neither are rejected (fail-closed). A verified
//! customer credential presented together with a guest token links the
//! guest's conversations before the request runs.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::handlers::ApiError;
use crate::server::GatewayState;

pub const GUEST_TOKEN_HEADER: &str = "x-guest-token";

/// Credentials presented on a request.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Presented {
    pub credential: Option<String>,
    pub guest_token: Option<String>,
}

impl std::fmt::Debug for Presented {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presented")
            .field("credential", &self.credential.as_ref().map(|_| "[redacted]"))
            .field("guest_token", &self.guest_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Read the bearer credential and guest token headers.
pub fn credentials_from_headers(headers: &HeaderMap) -> Presented {
    let credential = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string());
    let guest_token = headers
        .get(GUEST_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string());
    Presented {
        credential,
        guest_token,
    }
}

/// Middleware that resolves the caller and stores it as a request extension.
pub async fn require_caller(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = credentials_from_headers(request.headers());
    match state
        .service
        .authenticate(
            presented.credential.as_deref(),
            presented.guest_token.as_deref(),
        )
        .await
    {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), code = e.code(), "caller rejected");
            ApiError::from(e).into_response()
        }
    }
}
