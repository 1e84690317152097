// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Embedded mode: the guard as axum middleware.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/auth/login", post(login))
//!     .layer(middleware::from_fn_with_state(guard.clone(), guard_layer));
//! ```
//!
//! The server must be started with `into_make_service_with_connect_info`
//! so the peer address is available.

use crate::guard::{AbuseGuard, Outcome, RateHeaders, Rejection};
use crate::policy::RejectionCode;
use crate::request::{AuthenticatedUser, RequestInfo};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequest, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// Largest authentication body buffered to read the account name.
pub const MAX_AUTH_BODY_BYTES: usize = 16 * 1024;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// JSON body of a rejected request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub code: RejectionCode,
    pub retry_after: u64,
}

#[derive(Debug, Default, Deserialize)]
struct AccountFields {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// Run every request through [`AbuseGuard::protect`].
pub async fn guard_layer(
    State(guard): State<Arc<AbuseGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let mut info = RequestInfo::new(parts.method.clone(), parts.uri.path());
    info.headers = parts.headers.clone();
    info.peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    info.user_id = parts
        .extensions
        .get::<AuthenticatedUser>()
        .map(|user| user.0.clone());

    let needs_account = guard
        .routes()
        .resolve(&info.path)
        .is_some_and(|bundle| bundle.auth);
    let body = if needs_account {
        let bytes = match axum::body::to_bytes(body, MAX_AUTH_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %info.path, error = %err, "Unreadable authentication body");
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
        };
        info.email = claimed_account(&parts.headers, &bytes).await;
        Body::from(bytes)
    } else {
        body
    };

    match guard.protect(&info).await {
        Outcome::Reject(rejection) => rejection.into_response(),
        Outcome::Admit(admitted) => {
            let mut response = next.run(Request::from_parts(parts, body)).await;
            if let Some(rate) = admitted.rate {
                set_rate_headers(response.headers_mut(), &rate);
            }
            if let Some(ticket) = admitted.ticket {
                guard.complete(ticket, response.status()).await;
            }
            response
        }
    }
}

/// Email or username from a JSON or form-encoded body.
async fn claimed_account(headers: &HeaderMap, bytes: &Bytes) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?;
    let mut request = Request::new(Body::from(bytes.clone()));
    *request.method_mut() = Method::POST;
    request
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type.clone());

    let fields = if content_type
        .to_str()
        .is_ok_and(|ct| ct.starts_with("application/json"))
    {
        Json::<AccountFields>::from_request(request, &()).await.ok()?.0
    } else {
        Form::<AccountFields>::from_request(request, &()).await.ok()?.0
    };
    fields.email.or(fields.username)
}

pub fn set_rate_headers(headers: &mut HeaderMap, rate: &RateHeaders) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(rate.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(rate.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(rate.reset));
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (
            status,
            Json(RejectionBody {
                error: self.message,
                code: self.code,
                retry_after: self.retry_after_secs,
            }),
        )
            .into_response();

        let headers = response.headers_mut();
        headers.insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        if let Some(rate) = &self.rate {
            set_rate_headers(headers, rate);
        }
        response
    }
}
