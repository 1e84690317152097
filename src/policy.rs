// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Policy registry.
//!
//! A static catalogue of named rate limit and slowdown policies, built once
//! per environment at startup, optionally adjusted by an override file, and
//! validated before the first request is served. Policies are immutable
//! after that; all mutable state lives in the store.

use crate::error::ConfigError;
use crate::request::RequestInfo;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const GENERAL: &str = "general";
pub const API: &str = "api";
pub const AUTH_STRICT: &str = "auth_strict";
pub const BURST: &str = "burst";
pub const UPLOAD: &str = "upload";
pub const ADMIN: &str = "admin";
pub const CONTACT: &str = "contact";

pub const GENERAL_SLOWDOWN: &str = "general_slowdown";
pub const AUTH_SLOWDOWN: &str = "auth_slowdown";

/// Deployment environment. Development uses looser numeric thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "test" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Machine-readable rejection code returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    RateLimitExceeded,
    AuthRateLimitExceeded,
    IpBlocked,
    AccountLocked,
    BurstLimitExceeded,
    InternalError,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::AuthRateLimitExceeded => "AUTH_RATE_LIMIT_EXCEEDED",
            Self::IpBlocked => "IP_BLOCKED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::BurstLimitExceeded => "BURST_LIMIT_EXCEEDED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which requests a policy never counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exemption {
    /// Everything counts
    None,
    /// Static files (`/static/`, `/assets/`, common asset extensions)
    StaticAssets,
    /// Health and readiness probes
    HealthCheck,
    /// Safe methods (GET, HEAD, OPTIONS)
    ReadOnly,
}

const STATIC_PREFIXES: &[&str] = &["/static/", "/assets/", "/uploads/public/"];
const STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".map", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".woff",
    ".woff2", ".ttf",
];
const HEALTH_PATHS: &[&str] = &["/health", "/healthz", "/api/health"];

/// Static asset or favicon path.
pub fn is_static_asset(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    STATIC_PREFIXES.iter().any(|p| lower.starts_with(p))
        || STATIC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub fn is_health_check(path: &str) -> bool {
    HEALTH_PATHS.contains(&path)
}

impl Exemption {
    pub fn applies(&self, request: &RequestInfo) -> bool {
        match self {
            Self::None => false,
            Self::StaticAssets => is_static_asset(&request.path),
            Self::HealthCheck => is_health_check(&request.path),
            Self::ReadOnly => matches!(
                request.method,
                Method::GET | Method::HEAD | Method::OPTIONS
            ),
        }
    }
}

/// Quota policy: at most `max_requests` per `window_secs` per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub name: String,
    pub window_secs: u64,
    pub max_requests: u64,
    pub exemption: Exemption,
    /// Human-readable message returned on rejection
    pub message: String,
    /// Fixed retry hint; when unset the time to window reset is used
    pub retry_after_secs: Option<u64>,
    /// Code reported when this policy rejects
    pub code: RejectionCode,
}

impl RateLimitPolicy {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPolicy {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.window_secs == 0 {
            return Err(invalid("window_secs must be positive"));
        }
        if self.max_requests == 0 {
            return Err(invalid("max_requests must be positive"));
        }
        if self.message.trim().is_empty() {
            return Err(invalid("message must not be empty"));
        }
        Ok(())
    }
}

/// Progressive slowdown policy.
///
/// Requests beyond `delay_after` within the window are delayed by
/// `delay_increment_ms` per extra request, capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowdownPolicy {
    pub name: String,
    pub window_secs: u64,
    pub delay_after: u64,
    pub delay_increment_ms: u64,
    pub max_delay_ms: u64,
    /// Whether requests that end in an error response keep counting
    pub count_failed_requests: bool,
}

impl SlowdownPolicy {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPolicy {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.window_secs == 0 {
            return Err(invalid("window_secs must be positive"));
        }
        if self.delay_increment_ms == 0 {
            return Err(invalid("delay_increment_ms must be positive"));
        }
        if self.max_delay_ms < self.delay_increment_ms {
            return Err(invalid("max_delay_ms must be at least delay_increment_ms"));
        }
        Ok(())
    }
}

/// Partial update for a rate limit policy, read from the override file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitOverride {
    pub window_secs: Option<u64>,
    pub max_requests: Option<u64>,
    pub exemption: Option<Exemption>,
    pub message: Option<String>,
    pub retry_after_secs: Option<u64>,
}

/// Partial update for a slowdown policy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlowdownOverride {
    pub window_secs: Option<u64>,
    pub delay_after: Option<u64>,
    pub delay_increment_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub count_failed_requests: Option<bool>,
}

/// Contents of `GUARD_POLICY_FILE`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitOverride>,
    #[serde(default)]
    pub slowdowns: HashMap<String, SlowdownOverride>,
}

/// The catalogue of named policies.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    rate_limits: HashMap<String, Arc<RateLimitPolicy>>,
    slowdowns: HashMap<String, Arc<SlowdownPolicy>>,
}

impl PolicyRegistry {
    /// Built-in catalogue for an environment.
    pub fn for_environment(env: Environment) -> Self {
        // (production, development)
        let pick = |prod: u64, dev: u64| match env {
            Environment::Production => prod,
            Environment::Development => dev,
        };

        let rate_limits = vec![
            RateLimitPolicy {
                name: GENERAL.to_string(),
                window_secs: 15 * 60,
                max_requests: pick(100, 1000),
                exemption: Exemption::StaticAssets,
                message: "Too many requests from this client, please try again later.".to_string(),
                retry_after_secs: None,
                code: RejectionCode::RateLimitExceeded,
            },
            RateLimitPolicy {
                name: API.to_string(),
                window_secs: 60,
                max_requests: pick(60, 600),
                exemption: Exemption::None,
                message: "API rate limit exceeded, please slow down.".to_string(),
                retry_after_secs: None,
                code: RejectionCode::RateLimitExceeded,
            },
            RateLimitPolicy {
                name: AUTH_STRICT.to_string(),
                window_secs: 15 * 60,
                max_requests: pick(5, 50),
                exemption: Exemption::None,
                message: "Too many authentication attempts, please try again in 15 minutes."
                    .to_string(),
                retry_after_secs: Some(15 * 60),
                code: RejectionCode::AuthRateLimitExceeded,
            },
            RateLimitPolicy {
                name: BURST.to_string(),
                window_secs: 10,
                max_requests: pick(20, 200),
                exemption: Exemption::StaticAssets,
                message: "Too many requests in a short period, please wait a few seconds."
                    .to_string(),
                retry_after_secs: None,
                code: RejectionCode::BurstLimitExceeded,
            },
            RateLimitPolicy {
                name: UPLOAD.to_string(),
                window_secs: 60 * 60,
                max_requests: pick(20, 200),
                exemption: Exemption::ReadOnly,
                message: "Upload limit reached, please try again later.".to_string(),
                retry_after_secs: None,
                code: RejectionCode::RateLimitExceeded,
            },
            RateLimitPolicy {
                name: ADMIN.to_string(),
                window_secs: 15 * 60,
                max_requests: pick(300, 3000),
                exemption: Exemption::None,
                message: "Too many admin requests, please try again later.".to_string(),
                retry_after_secs: None,
                code: RejectionCode::RateLimitExceeded,
            },
            RateLimitPolicy {
                name: CONTACT.to_string(),
                window_secs: 60 * 60,
                max_requests: pick(5, 50),
                exemption: Exemption::ReadOnly,
                message: "Too many form submissions, please try again in an hour.".to_string(),
                retry_after_secs: Some(60 * 60),
                code: RejectionCode::RateLimitExceeded,
            },
        ];

        let slowdowns = vec![
            SlowdownPolicy {
                name: GENERAL_SLOWDOWN.to_string(),
                window_secs: 15 * 60,
                delay_after: pick(50, 500),
                delay_increment_ms: 500,
                max_delay_ms: 20_000,
                count_failed_requests: false,
            },
            SlowdownPolicy {
                name: AUTH_SLOWDOWN.to_string(),
                window_secs: 15 * 60,
                delay_after: 2,
                delay_increment_ms: 1_000,
                max_delay_ms: 5_000,
                count_failed_requests: true,
            },
        ];

        Self::from_policies(rate_limits, slowdowns)
    }

    /// Registry from explicit policy lists. Later duplicates replace earlier ones.
    pub fn from_policies(rate_limits: Vec<RateLimitPolicy>, slowdowns: Vec<SlowdownPolicy>) -> Self {
        Self {
            rate_limits: rate_limits
                .into_iter()
                .map(|p| (p.name.clone(), Arc::new(p)))
                .collect(),
            slowdowns: slowdowns
                .into_iter()
                .map(|p| (p.name.clone(), Arc::new(p)))
                .collect(),
        }
    }

    pub fn rate_limit(&self, name: &str) -> Result<Arc<RateLimitPolicy>, ConfigError> {
        self.rate_limits
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownRateLimitPolicy(name.to_string()))
    }

    pub fn slowdown(&self, name: &str) -> Result<Arc<SlowdownPolicy>, ConfigError> {
        self.slowdowns
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSlowdownPolicy(name.to_string()))
    }

    /// Apply overrides. Naming a policy that does not exist is an error.
    pub fn apply_overrides(&mut self, overrides: &PolicyOverrides) -> Result<(), ConfigError> {
        for (name, o) in &overrides.rate_limits {
            let current = self.rate_limit(name)?;
            let mut policy = (*current).clone();
            if let Some(v) = o.window_secs {
                policy.window_secs = v;
            }
            if let Some(v) = o.max_requests {
                policy.max_requests = v;
            }
            if let Some(v) = o.exemption {
                policy.exemption = v;
            }
            if let Some(v) = &o.message {
                policy.message = v.clone();
            }
            if let Some(v) = o.retry_after_secs {
                policy.retry_after_secs = Some(v);
            }
            self.rate_limits.insert(name.clone(), Arc::new(policy));
        }

        for (name, o) in &overrides.slowdowns {
            let current = self.slowdown(name)?;
            let mut policy = (*current).clone();
            if let Some(v) = o.window_secs {
                policy.window_secs = v;
            }
            if let Some(v) = o.delay_after {
                policy.delay_after = v;
            }
            if let Some(v) = o.delay_increment_ms {
                policy.delay_increment_ms = v;
            }
            if let Some(v) = o.max_delay_ms {
                policy.max_delay_ms = v;
            }
            if let Some(v) = o.count_failed_requests {
                policy.count_failed_requests = v;
            }
            self.slowdowns.insert(name.clone(), Arc::new(policy));
        }

        self.validate()
    }

    /// Check every policy is well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for policy in self.rate_limits.values() {
            policy.validate()?;
        }
        for policy in self.slowdowns.values() {
            policy.validate()?;
        }
        Ok(())
    }
}
