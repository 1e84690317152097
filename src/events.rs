// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Structured security events.
//!
//! Every rejection, lock transition and alert is handed to a
//! [`SecurityEventSink`]. Persisting events (files, SIEM) is the job of the
//! sink's owner; the default [`TracingSink`] writes them to the tracing
//! pipeline.

use crate::policy::RejectionCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    RateLimitExceeded,
    AuthRateLimitExceeded,
    BurstLimitExceeded,
    IpBlocked,
    AccountLocked,
    GuardFailure,
    FailedLoginThreshold,
    RejectionThreshold,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::AuthRateLimitExceeded => "AUTH_RATE_LIMIT_EXCEEDED",
            Self::BurstLimitExceeded => "BURST_LIMIT_EXCEEDED",
            Self::IpBlocked => "IP_BLOCKED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::GuardFailure => "GUARD_FAILURE",
            Self::FailedLoginThreshold => "FAILED_LOGIN_THRESHOLD",
            Self::RejectionThreshold => "REJECTION_THRESHOLD",
        }
    }
}

impl From<RejectionCode> for SecurityEventType {
    fn from(code: RejectionCode) -> Self {
        match code {
            RejectionCode::RateLimitExceeded => Self::RateLimitExceeded,
            RejectionCode::AuthRateLimitExceeded => Self::AuthRateLimitExceeded,
            RejectionCode::BurstLimitExceeded => Self::BurstLimitExceeded,
            RejectionCode::IpBlocked => Self::IpBlocked,
            RejectionCode::AccountLocked => Self::AccountLocked,
            RejectionCode::InternalError => Self::GuardFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub key: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        key: impl Into<String>,
        endpoint: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            event_type,
            severity,
            key: key.into(),
            endpoint: endpoint.into(),
            timestamp: DateTime::from_timestamp_millis(now_ms as i64).unwrap_or_else(Utc::now),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Receiver of security events.
pub trait SecurityEventSink: Send + Sync {
    fn emit(&self, event: SecurityEvent);
}

/// Writes events as tracing events under the `security` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SecurityEventSink for TracingSink {
    fn emit(&self, event: SecurityEvent) {
        let event_type = event.event_type.as_str();
        match event.severity {
            Severity::Critical | Severity::High => error!(
                target: "security",
                event_type,
                severity = ?event.severity,
                key = %event.key,
                endpoint = %event.endpoint,
                timestamp = %event.timestamp.to_rfc3339(),
                detail = ?event.detail,
                "Security event"
            ),
            Severity::Medium => warn!(
                target: "security",
                event_type,
                key = %event.key,
                endpoint = %event.endpoint,
                timestamp = %event.timestamp.to_rfc3339(),
                detail = ?event.detail,
                "Security event"
            ),
            Severity::Low => info!(
                target: "security",
                event_type,
                key = %event.key,
                endpoint = %event.endpoint,
                "Security event"
            ),
        }
    }
}

/// Keeps events in memory. Handy for embedding and tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, event_type: SecurityEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl SecurityEventSink for CollectingSink {
    fn emit(&self, event: SecurityEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
