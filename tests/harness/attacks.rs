// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Attack simulation patterns for security testing.

use std::time::Duration;

/// What the simulated client is hitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A general API endpoint
    Api,
    /// The login endpoint, with wrong passwords
    Login,
}

impl Target {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Api => "/api/posts",
            Self::Login => "/api/auth/login",
        }
    }
}

/// Attack pattern configuration.
#[derive(Debug, Clone)]
pub struct AttackConfig {
    /// Total number of requests to send
    pub total_requests: usize,
    /// Requests per second rate (simulated clock)
    pub requests_per_second: f64,
    /// Number of unique peer IPs to simulate
    pub unique_ips: usize,
    /// Number of unique accounts (login attacks)
    pub unique_accounts: usize,
    /// Endpoint under attack
    pub target: Target,
    /// Send a different forged `X-Forwarded-For` on every request
    pub spoof_forwarded_for: bool,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 10.0,
            unique_ips: 1,
            unique_accounts: 1,
            target: Target::Api,
            spoof_forwarded_for: false,
        }
    }
}

/// Predefined attack patterns.
impl AttackConfig {
    /// Single IP flood - simulates basic DoS from one source.
    pub fn single_ip_flood() -> Self {
        Self {
            total_requests: 200,
            requests_per_second: 100.0,
            ..Default::default()
        }
    }

    /// Distributed attack - many IPs, low rate each.
    pub fn distributed_attack() -> Self {
        Self {
            total_requests: 500,
            requests_per_second: 50.0,
            unique_ips: 100,
            ..Default::default()
        }
    }

    /// Credential stuffing - one host trying many accounts.
    pub fn credential_stuffing() -> Self {
        Self {
            total_requests: 50,
            requests_per_second: 1.0,
            unique_ips: 1,
            unique_accounts: 50,
            target: Target::Login,
            ..Default::default()
        }
    }

    /// Password spraying against one account from rotating IPs.
    pub fn account_takeover() -> Self {
        Self {
            total_requests: 30,
            requests_per_second: 1.0,
            unique_ips: 30,
            unique_accounts: 1,
            target: Target::Login,
            ..Default::default()
        }
    }

    /// Flood that forges a fresh `X-Forwarded-For` per request.
    pub fn forwarded_for_rotation() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 100.0,
            spoof_forwarded_for: true,
            ..Default::default()
        }
    }

    /// Slow drip - stay just under rate limits.
    pub fn slow_drip() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 0.9, // 54/min < 60 limit
            ..Default::default()
        }
    }

    /// Simulated time between requests.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }

    /// Calculate expected duration for the attack.
    pub fn expected_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_requests as f64 / self.requests_per_second)
    }
}

/// Expected outcomes for different attack types.
pub struct AttackExpectations {
    /// Maximum ratio of requests that should be allowed
    pub max_allowed_ratio: f64,
    /// Description of expected behavior
    pub description: &'static str,
}

impl AttackConfig {
    /// Get expected outcomes for this attack pattern.
    pub fn expectations(&self) -> AttackExpectations {
        match self.target {
            Target::Login if self.unique_ips == 1 => AttackExpectations {
                max_allowed_ratio: 5.0 / self.total_requests as f64,
                description: "IP blocked after 5 failures",
            },
            Target::Login => AttackExpectations {
                max_allowed_ratio: 3.0 / self.total_requests as f64,
                description: "Account locked after 3 failures",
            },
            Target::Api if self.unique_ips == 1 && self.requests_per_second > 2.0 => {
                AttackExpectations {
                    // Burst window admits 20 per 10 s
                    max_allowed_ratio: 20.0 / self.total_requests as f64
                        * (self.expected_duration().as_secs_f64() / 10.0).ceil(),
                    description: "Burst policy caps a single client",
                }
            }
            Target::Api => AttackExpectations {
                max_allowed_ratio: 1.0,
                description: "Traffic under per-client limits is admitted",
            },
        }
    }
}
