// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Rate limit identity for a request.
//!
//! Precedence: authenticated user id, then claimed email, then client IP.
//! The client IP is the first `X-Forwarded-For` hop only when proxy trust
//! is enabled; otherwise the TCP peer address. The header is never trusted
//! anywhere else in the crate.

use crate::request::RequestInfo;
use std::fmt;
use std::net::IpAddr;

/// Used when no identity can be derived. Never empty, so limiting is never
/// silently disabled.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    User,
    Email,
    Ip,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Email => "email",
            Self::Ip => "ip",
        }
    }
}

/// Identity that counters are tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub kind: KeyKind,
    pub value: String,
}

impl RateLimitKey {
    pub fn ip(value: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Ip,
            value: value.into(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Normalise an account identifier (email or username).
pub fn normalize_account(account: &str) -> Option<String> {
    let trimmed = account.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyResolver {
    trust_proxy: bool,
}

impl KeyResolver {
    pub fn new(trust_proxy: bool) -> Self {
        Self { trust_proxy }
    }

    pub fn resolve_key(&self, request: &RequestInfo) -> RateLimitKey {
        if let Some(user) = request.user_id.as_deref().map(str::trim) {
            if !user.is_empty() {
                return RateLimitKey {
                    kind: KeyKind::User,
                    value: user.to_string(),
                };
            }
        }

        if let Some(email) = request.email.as_deref().and_then(normalize_account) {
            return RateLimitKey {
                kind: KeyKind::Email,
                value: email,
            };
        }

        RateLimitKey::ip(self.client_ip(request))
    }

    /// Client address as a string, `"unknown"` if none can be determined.
    pub fn client_ip(&self, request: &RequestInfo) -> String {
        self.client_addr(request)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    pub fn client_addr(&self, request: &RequestInfo) -> Option<IpAddr> {
        if self.trust_proxy {
            if let Some(ip) = request
                .header("x-forwarded-for")
                .and_then(first_forwarded_hop)
            {
                return Some(ip);
            }
        }
        request.peer
    }
}

/// Leftmost address in an `X-Forwarded-For` chain (the original client).
fn first_forwarded_hop(header: &str) -> Option<IpAddr> {
    header.split(',').next().map(str::trim)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn req() -> RequestInfo {
        RequestInfo::new(Method::POST, "/api/posts").with_peer("10.0.0.9".parse().unwrap())
    }

    #[test]
    fn test_user_beats_email_and_ip() {
        let resolver = KeyResolver::new(false);
        let key = resolver.resolve_key(&req().with_user("u-42").with_email("a@b.c"));
        assert_eq!(key.kind, KeyKind::User);
        assert_eq!(key.to_string(), "user:u-42");
    }

    #[test]
    fn test_email_is_normalized() {
        let resolver = KeyResolver::new(false);
        let key = resolver.resolve_key(&req().with_email("  Alice@Example.COM "));
        assert_eq!(key.kind, KeyKind::Email);
        assert_eq!(key.value, "alice@example.com");
    }

    #[test]
    fn test_forwarded_for_only_with_proxy_trust() {
        let request = req().with_header("X-Forwarded-For", "203.0.113.7, 10.0.0.1");

        let untrusted = KeyResolver::new(false).resolve_key(&request);
        assert_eq!(untrusted, RateLimitKey::ip("10.0.0.9"));

        let trusted = KeyResolver::new(true).resolve_key(&request);
        assert_eq!(trusted, RateLimitKey::ip("203.0.113.7"));
    }

    #[test]
    fn test_garbage_forwarded_for_falls_back_to_peer() {
        let request = req().with_header("X-Forwarded-For", "not-an-ip");
        assert_eq!(KeyResolver::new(true).client_ip(&request), "10.0.0.9");
    }

    #[test]
    fn test_unknown_as_last_resort() {
        let request = RequestInfo::new(Method::GET, "/");
        let key = KeyResolver::new(true).resolve_key(&request);
        assert_eq!(key, RateLimitKey::ip(UNKNOWN_CLIENT));
    }
}
