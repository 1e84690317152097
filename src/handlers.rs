// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the standalone guard service.
//!
//! In external-authorization mode a reverse proxy posts request metadata
//! to `/check` before forwarding. When the decision carries a `ticket`, the
//! proxy posts it with the upstream status to `/complete`; that refunds
//! slowdown counts for failed responses and, on login routes, records the
//! login outcome. Proxies that do not track tickets can report logins to
//! `/login-result` instead, but should not do both for the same request.

use crate::config::Config;
use crate::guard::{AbuseGuard, Outcome, ResponseTicket};
use crate::middleware::guard_layer;
use crate::policy::RejectionCode;
use crate::request::RequestInfo;
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// How long a ticket issued by `/check` can be redeemed at `/complete`.
pub const TICKET_TTL: Duration = Duration::from_secs(5 * 60);

/// Shared application state.
pub struct AppState {
    pub guard: Arc<AbuseGuard>,
    pub config: Config,
    pub tickets: TicketBook,
}

impl AppState {
    pub fn new(guard: Arc<AbuseGuard>, config: Config) -> Self {
        Self {
            guard,
            config,
            tickets: TicketBook::default(),
        }
    }
}

#[derive(Default)]
struct PendingTickets {
    next_id: u64,
    by_id: BTreeMap<u64, (Instant, ResponseTicket)>,
}

/// Response tickets waiting for the proxy to report the upstream status.
///
/// Ids are issued in order, so expired tickets are always at the front and
/// are dropped as new ones come in. Tickets never redeemed simply expire.
#[derive(Default)]
pub struct TicketBook {
    pending: Mutex<PendingTickets>,
}

impl TicketBook {
    pub async fn issue(&self, ticket: ResponseTicket) -> u64 {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        while let Some(entry) = pending.by_id.first_entry() {
            if now.duration_since(entry.get().0) < TICKET_TTL {
                break;
            }
            entry.remove();
        }
        pending.next_id += 1;
        let id = pending.next_id;
        pending.by_id.insert(id, (now, ticket));
        id
    }

    /// Take a ticket out of the book. `None` if unknown, used or expired.
    pub async fn redeem(&self, id: u64) -> Option<ResponseTicket> {
        let (issued, ticket) = self.pending.lock().await.by_id.remove(&id)?;
        (issued.elapsed() < TICKET_TTL).then_some(ticket)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Request metadata posted by a proxy.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub ip: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Decision returned to the proxy.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<RejectionCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<u64>,
    #[serde(default)]
    pub delay_ms: u64,
    /// Redeem at `/complete` with the upstream status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<u64>,
}

/// Upstream status for a request admitted by `/check`.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub ticket: u64,
    pub status: u16,
}

/// Login outcome reported by a proxy.
#[derive(Debug, Deserialize)]
pub struct LoginResultRequest {
    pub ip: String,
    #[serde(default)]
    pub account: Option<String>,
    pub succeeded: bool,
    #[serde(default = "default_login_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResultResponse {
    pub ip_locked: bool,
    pub account_locked: bool,
    pub remaining_attempts: u32,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_login_endpoint() -> String {
    "/api/auth/login".to_string()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: "BAD_REQUEST",
        }),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal error".to_string(),
            code: "INTERNAL_ERROR",
        }),
    )
        .into_response()
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "abuse-guard",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Evaluate a proxied request.
///
/// Always answers 200 with the decision in the body, so the proxy can
/// relay the code and retry hint.
pub async fn check(State(state): State<Arc<AppState>>, Json(req): Json<CheckRequest>) -> Response {
    let Ok(ip) = req.ip.parse::<IpAddr>() else {
        warn!(ip = %req.ip, "Invalid IP address format");
        return bad_request("Invalid IP address format");
    };
    let Ok(method) = Method::from_bytes(req.method.as_bytes()) else {
        return bad_request("Invalid HTTP method");
    };

    let mut info = RequestInfo::new(method, req.path.as_str()).with_peer(ip);
    for (name, value) in &req.headers {
        info = info.with_header(name, value);
    }
    info.user_id = req.user_id;
    info.email = req.email;

    debug!(ip = %ip, path = %info.path, "Processing check");

    let response = match state.guard.protect(&info).await {
        Outcome::Admit(admitted) => {
            let ticket = match admitted.ticket {
                Some(ticket) => Some(state.tickets.issue(ticket).await),
                None => None,
            };
            CheckResponse {
                allowed: true,
                code: None,
                reason: None,
                retry_after_secs: None,
                limit: admitted.rate.map(|r| r.limit),
                remaining: admitted.rate.map(|r| r.remaining),
                reset: admitted.rate.map(|r| r.reset),
                delay_ms: admitted.delay.as_millis() as u64,
                ticket,
            }
        }
        Outcome::Reject(rejection) => CheckResponse {
            allowed: false,
            code: Some(rejection.code),
            reason: Some(rejection.message),
            retry_after_secs: Some(rejection.retry_after_secs),
            limit: rejection.rate.map(|r| r.limit),
            remaining: rejection.rate.map(|r| r.remaining),
            reset: rejection.rate.map(|r| r.reset),
            delay_ms: 0,
            ticket: None,
        },
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Settle a request admitted by `/check` once the upstream answered.
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompleteRequest>,
) -> Response {
    let Ok(status) = StatusCode::from_u16(req.status) else {
        return bad_request("Invalid HTTP status");
    };
    let Some(ticket) = state.tickets.redeem(req.ticket).await else {
        debug!(ticket = req.ticket, "Unknown or expired ticket");
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Unknown or expired ticket".to_string(),
                code: "UNKNOWN_TICKET",
            }),
        )
            .into_response();
    };
    state.guard.complete(ticket, status).await;
    StatusCode::NO_CONTENT.into_response()
}

/// Record a login outcome from the proxy.
pub async fn login_result(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginResultRequest>,
) -> Response {
    let Ok(addr) = req.ip.parse::<IpAddr>() else {
        warn!(ip = %req.ip, "Invalid IP address format");
        return bad_request("Invalid IP address format");
    };
    // Same canonical form `/check` keys the IP axis by
    let ip = addr.to_string();

    let guard = &state.guard;
    let result = guard
        .record_login(&ip, req.account.as_deref(), req.succeeded, &req.endpoint)
        .await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(ip = %ip, error = %err, "Failed to record login result");
            return internal_error();
        }
    };

    let remaining = guard.tracker().remaining_attempts(&ip).await;
    let account_locked = match req.account.as_deref() {
        Some(account) => guard.tracker().is_account_blocked(account).await,
        None => Ok(false),
    };
    match (remaining, account_locked) {
        (Ok(remaining_attempts), Ok(account_locked)) => {
            if outcome.ip_locked.is_some() || outcome.account_locked.is_some() {
                info!(ip = %ip, "Login result triggered a lock");
            }
            Json(LoginResultResponse {
                ip_locked: remaining_attempts == 0,
                account_locked,
                remaining_attempts,
            })
            .into_response()
        }
        (Err(err), _) | (_, Err(err)) => {
            error!(ip = %ip, error = %err, "Failed to read lock state");
            internal_error()
        }
    }
}

/// Usage statistics for operational tooling.
pub async fn stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.guard.stats().snapshot().await).into_response()
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.guard.metrics().encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to encode metrics");
            internal_error()
        }
    }
}

/// Service router. `/stats` itself is guarded under the general policy.
pub fn router(state: Arc<AppState>) -> Router {
    let stats_route = Router::new()
        .route("/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(
            state.guard.clone(),
            guard_layer,
        ));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/check", post(check))
        .route("/complete", post(complete))
        .route("/login-result", post(login_result))
        .merge(stats_route);

    if state.config.metrics.enabled {
        app = app.route(&state.config.metrics.path, get(metrics));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
